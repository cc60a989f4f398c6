pub mod aggregate;
pub mod baseline;
pub mod entropy;
pub mod extract;
pub mod scan;
pub mod summarize;
pub mod table;

pub use aggregate::{aggregate, AggregateOptions, AggregateReport};
pub use baseline::{codebook_baseline, BaselineRow, CODEBOOK_SIZES};
pub use entropy::{entropy_stats, EntropyStats};
pub use extract::{extract, EvalVariant, ExtractOptions, MetricRecord, Metrics};
pub use scan::{find_artifacts, is_artifact};
pub use summarize::{summarize, GroupValue, OutputFormat, Reduction, Summary, SummaryRow};
pub use table::{MetricTable, TABLE_FILE};
