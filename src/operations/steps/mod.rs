//! Built-in step kinds

mod command;
mod fetch;
mod files;
mod mojangdl;

use std::sync::Arc;

use super::{Downloader, OperationFactory};

pub use command::{Command, CommandFactory};
pub use fetch::{Fetch, FetchFactory};
pub use files::{Mkdir, MkdirFactory, MoveFile, MoveFileFactory, WriteFile, WriteFileFactory};
pub use mojangdl::{MojangDl, MojangDlFactory, MOJANG_MANIFEST_URL};

pub fn builtin(downloader: Arc<Downloader>) -> Vec<Arc<dyn OperationFactory>> {
    vec![
        Arc::new(CommandFactory),
        Arc::new(MkdirFactory),
        Arc::new(MoveFileFactory),
        Arc::new(WriteFileFactory),
        Arc::new(FetchFactory::new(Arc::clone(&downloader))),
        Arc::new(MojangDlFactory::new(downloader)),
    ]
}
