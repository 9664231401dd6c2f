use quarry::bridge::{error_reply, Bridge};
use quarry::collection::{Document, Namespace};
use quarry::errors::QuarryResult;
use quarry::store::file::FileStoreConfig;
use quarry::store::memory::MemoryStoreConfig;
use quarry::store::{cursor_batch, Store};
use quarry::Quarry;
use std::backtrace::Backtrace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Database routed to the file store of a [TestContext].
pub const FILE_DB: &str = "site";

/// Runs `test` between `before` and `after`.
///
/// `after` runs whether the test fails or not. Failures and panics are
/// reported with a backtrace and fail the calling test.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> QuarryResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> QuarryResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> QuarryResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    let result = std::panic::catch_unwind(|| {
        let backtrace = Backtrace::capture();
        let ctx = match before() {
            Ok(ctx) => ctx,
            Err(e) => return Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
        };
        match test(ctx.clone()) {
            Ok(_) => after(ctx).map_err(|e| (format!("After run failed: {:?}", e), backtrace.to_string())),
            Err(e) => {
                let _ = after(ctx);
                Err((format!("Test failed: {:?}", e), backtrace.to_string()))
            }
        }
    });

    match result {
        Ok(Ok(_)) => {}
        Ok(Err((error, backtrace))) => {
            if !backtrace.is_empty() && !backtrace.contains("disabled") {
                eprintln!("\nBacktrace:\n{}", backtrace);
            }
            panic!("{}", error);
        }
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// An engine with a file store mounted for [FILE_DB] and a memory store
/// catching every other database.
#[derive(Clone)]
pub struct TestContext {
    dir: Arc<TempDir>,
    quarry: Quarry,
    files: Store,
    memory: Store,
    bridge: Bridge,
}

impl TestContext {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of a file below the file store's root.
    pub fn file(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn quarry(&self) -> Quarry {
        self.quarry.clone()
    }

    pub fn files(&self) -> Store {
        self.files.clone()
    }

    pub fn memory(&self) -> Store {
        self.memory.clone()
    }

    pub fn bridge(&self) -> Bridge {
        self.bridge.clone()
    }

    /// Runs `find` through the bridge and drains every batch.
    pub fn find_all(&self, database: &str, command: Document) -> QuarryResult<Vec<Document>> {
        drain(&self.bridge, database, command)
    }
}

pub fn create_test_context() -> QuarryResult<TestContext> {
    let quarry = Quarry::builder().build()?;
    create_context_with(quarry, |root| FileStoreConfig::new(root))
}

/// Builds a context whose file store is configured by `configure`, which
/// receives the temporary root.
pub fn create_context_with<F>(quarry: Quarry, configure: F) -> QuarryResult<TestContext>
where
    F: Fn(&Path) -> FileStoreConfig,
{
    let dir = TempDir::new()?;
    let files = quarry.file_store(configure(dir.path()))?;
    let memory = quarry.memory_store(MemoryStoreConfig::new())?;
    let bridge = Bridge::builder()
        .mount([FILE_DB], files.clone())
        .mount(["*"], memory.clone())
        .build()?;

    Ok(TestContext {
        dir: Arc::new(dir),
        quarry,
        files,
        memory,
        bridge,
    })
}

/// A bridge over a memory store whose failures come back as replies.
pub fn create_reply_bridge() -> QuarryResult<Bridge> {
    let quarry = Quarry::builder().build()?;
    let memory = quarry.memory_store(MemoryStoreConfig::new())?;
    Bridge::builder()
        .mount(["*"], memory)
        .middleware(error_reply())
        .build()
}

pub fn cleanup(ctx: TestContext) -> QuarryResult<()> {
    if let Err(e) = ctx.bridge().close() {
        eprintln!("Warning: Failed to close bridge: {:?}", e);
    }
    Ok(())
}

/// Runs a cursor command and follows it with `getMore` until exhausted.
pub fn drain(bridge: &Bridge, database: &str, command: Document) -> QuarryResult<Vec<Document>> {
    let collection = quarry::store::command_collection(&command)?;
    let namespace = Namespace::new(database, &collection);
    let mut reply = bridge.dispatch(&namespace, command)?;
    let mut documents = cursor_batch(&reply);
    loop {
        let id = quarry::store::cursor_id(&reply);
        if id == 0 {
            return Ok(documents);
        }
        reply = bridge.dispatch(
            &namespace,
            quarry::doc! { getMore: id, collection: (collection.as_str()) },
        )?;
        documents.extend(cursor_batch(&reply));
    }
}
