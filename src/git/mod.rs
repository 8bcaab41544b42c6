pub mod backup;
pub mod repository;
pub mod scanner;

pub use backup::run_backup;
pub use repository::RepositoryPath;
pub use scanner::RepositoryScanner;
