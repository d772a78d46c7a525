pub mod annotation;
pub mod variant;

// re-export for cleaner imports
pub use self::annotation::{AnnotationPayload, AnnotationRecord, FieldValue};
pub use self::variant::VariantKey;
