pub mod fields;

pub use fields::FieldExtractorSet;
