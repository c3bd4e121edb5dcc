pub mod types;
pub mod utils;
pub mod traits;
pub mod store;
pub mod reference;
pub mod fetcher;
pub mod pageviews;
pub mod aggregator;
pub mod report;
pub mod dump;
pub mod dictionary;
pub mod llm_adapter;
pub mod reassess;

pub use types::*;
pub use traits::{JudgmentOracle, LookupOutcome, PopularityLookup};
pub use store::KvStore;
pub use reference::{FrequencyTable, ReferencePaths, References, WordSet};
pub use fetcher::WikimediaPageviews;
pub use pageviews::{PageviewResolver, WarmStats};
pub use aggregator::{AggregationReport, SignalAggregator, SignalBundle, WordRecord};
pub use dump::{BuildOutcome, DefinitionCache};
pub use dictionary::{build_dictionary, Dictionary, DictionaryOptions};
pub use llm_adapter::GeminiOracle;
pub use reassess::{AssessmentState, LoopSummary, ReassessmentLoop};
