pub mod analysis;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod inline;
pub mod job;
pub mod logging;
pub mod queue;
pub mod sanitize;
pub mod status;
pub mod storage;
pub mod worker;

pub use analysis::{
    Analyzer, CancelToken, CommandAnalyzer, Document, DocumentTextExtractor, TextExtractor,
};
pub use config::{load_config, Config};
pub use db::Database;
pub use dispatcher::{Dispatcher, DispatcherSettings, SubmitRequest, Submission};
pub use error::{
    AnalysisError, ConfigError, FinalyzeError, LookupError, QueueError, Result, StorageError,
    SubmitError, WorkerError,
};
pub use inline::{InlineAnalysis, InlineReport};
pub use job::{AnalysisResult, Job, JobStatus, DEFAULT_QUERY};
pub use queue::{ChannelQueue, Queue, QueueMessage, SqliteQueue};
pub use status::{HistoryPage, Stats, StatusService, StatusSettings};
pub use storage::ArtifactStore;
pub use worker::{JobProcessor, ProcessOutcome, WorkerPool};
