//! External collaborators
//!
//! Each collaborator is a trait the pipelines call, with one production
//! implementation:
//! - Fingerprinting: `fpcalc`
//! - Recognition: AcoustID
//! - Release enrichment: MusicBrainz
//! - Tag access: lofty
//!
//! plus the library scanner used by seeding.

pub mod acoustid_client;
pub mod file_scanner;
pub mod fingerprinter;
pub mod musicbrainz_client;
pub mod tag_store;

pub use acoustid_client::{AcoustIdClient, Candidate, RecognitionError, RecognitionService, Recording, ReleaseGroup};
pub use file_scanner::{FileScanner, ScanError};
pub use fingerprinter::{Fingerprint, FingerprintError, Fingerprinter, FpcalcFingerprinter};
pub use musicbrainz_client::{EnrichmentError, MusicBrainzClient, ReleaseDetails, ReleaseEnrichment};
pub use tag_store::{LoftyTagStore, TagError, TagStore};
