mod default;

pub use default::DefaultAggregator;
