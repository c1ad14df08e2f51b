mod add_fields;
mod filter_regex;

pub use add_fields::AddFieldsProcessor;
pub use filter_regex::FilterRegexProcessor;
