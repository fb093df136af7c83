//! Loader — compiles programs, registers their metrics, and runs them
//! against the line conduit.
//!
//! ```text
//! LineStream ──► dispatcher ──┬──► program task (a.prog) ──► MetricsStore
//!                             └──► program task (b.prog) ──► MetricsStore
//!                                          │
//!                          all tasks exited ──► done signal
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use logwarp_core::LineStream;
use logwarp_metrics::{Metric, MetricsStore, StoreError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::error::{LoaderError, LoaderResult};
use crate::program::{Program, compile};

/// File extension of program sources.
pub const PROGRAM_EXTENSION: &str = "prog";

pub struct LoaderOptions {
    pub store: MetricsStore,
    /// Conduit the programs consume.
    pub lines: LineStream,
    /// Compile and report errors only; register nothing.
    pub compile_only: bool,
    /// Keep each compiled program's instruction listing; see
    /// [`Loader::listings`].
    pub dump_bytecode: bool,
    /// Patch yearless timestamps with the current year.
    pub syslog_use_current_year: bool,
}

pub struct Loader {
    store: MetricsStore,
    lines: Option<LineStream>,
    compile_only: bool,
    dump_bytecode: bool,
    syslog_use_current_year: bool,
    programs: Vec<Arc<Program>>,
    listings: Vec<String>,
    done_tx: Option<watch::Sender<bool>>,
    done_rx: watch::Receiver<bool>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Loader {
    pub fn new(options: LoaderOptions) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            store: options.store,
            lines: Some(options.lines),
            compile_only: options.compile_only,
            dump_bytecode: options.dump_bytecode,
            syslog_use_current_year: options.syslog_use_current_year,
            programs: Vec::new(),
            listings: Vec::new(),
            done_tx: Some(done_tx),
            done_rx,
            dispatcher: None,
        }
    }

    /// Load every `*.prog` file in directory `path`, or the single file at
    /// `path`. Returns the number of programs that failed to load.
    pub async fn load_programs(&mut self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        let files = match program_files(path) {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "cannot load programs");
                return 1;
            }
        };

        let mut errors = 0;
        for file in files {
            match self.load_program(&file).await {
                Ok(()) => {}
                Err(e) => {
                    error!(error = %e, "program failed to load");
                    errors += 1;
                }
            }
        }

        info!(
            path = %path.display(),
            loaded = self.programs.len(),
            errors,
            "programs loaded"
        );
        errors
    }

    async fn load_program(&mut self, path: &Path) -> LoaderResult<()> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LoaderError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let program = compile(&name, &source).map_err(|errors| LoaderError::Compile {
            path: path.to_path_buf(),
            errors,
        })?;

        if self.dump_bytecode {
            self.listings.push(program.disassemble());
        }
        if self.compile_only {
            debug!(program = %name, "compiled");
            return Ok(());
        }

        self.register_metrics(path, &program).await?;
        info!(program = %name, rules = program.code().len(), "program loaded");
        self.programs.push(Arc::new(program));
        Ok(())
    }

    /// Register all of a program's metrics, or none of them.
    async fn register_metrics(&self, path: &Path, program: &Program) -> LoaderResult<()> {
        let store_err = |source| LoaderError::Store {
            path: path.to_path_buf(),
            source,
        };

        for decl in program.metrics() {
            if let Some(existing) = self.store.get(&decl.name).await {
                return Err(store_err(StoreError::Duplicate {
                    name: decl.name.clone(),
                    program: existing.program,
                }));
            }
        }
        for decl in program.metrics() {
            let metric = Metric::new(&decl.name, program.name(), decl.kind, decl.labels.clone());
            self.store.add(metric).await.map_err(store_err)?;
        }
        Ok(())
    }

    /// Names of the programs that will run.
    pub fn programs(&self) -> Vec<String> {
        self.programs.iter().map(|p| p.name().to_string()).collect()
    }

    /// Instruction listings of every program compiled with `dump_bytecode`,
    /// in load order. Programs that failed to compile have none.
    pub fn listings(&self) -> &[String] {
        &self.listings
    }

    /// Start consuming the conduit. The done signal fires once the conduit
    /// is closed and every program has processed every line.
    pub fn start(&mut self) -> LoaderResult<()> {
        let (Some(lines), Some(done_tx)) = (self.lines.take(), self.done_tx.take()) else {
            return Err(LoaderError::AlreadyStarted);
        };

        let programs = self.programs.clone();
        let store = self.store.clone();
        let patch_year = self.syslog_use_current_year;
        self.dispatcher = Some(tokio::spawn(dispatch(
            lines, programs, store, patch_year, done_tx,
        )));
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Wait for the done signal. Returns immediately if the engine was never
    /// started, since nothing would ever consume the conduit.
    pub async fn wait_done(&self) {
        if self.dispatcher.is_none() {
            debug!("program engine not started; nothing to wait for");
            return;
        }
        let mut rx = self.done_rx.clone();
        if rx.wait_for(|done| *done).await.is_err() {
            error!("program engine exited without signalling completion");
        }
    }
}

fn program_files(path: &Path) -> LoaderResult<Vec<PathBuf>> {
    let io_err = |source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    };

    let meta = std::fs::metadata(path).map_err(io_err)?;
    if !meta.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| io_err(e.into()))?;
        let p = entry.path();
        if entry.file_type().is_file()
            && p.extension().is_some_and(|ext| ext == PROGRAM_EXTENSION)
        {
            files.push(p.to_path_buf());
        }
    }
    Ok(files)
}

async fn dispatch(
    mut lines: LineStream,
    programs: Vec<Arc<Program>>,
    store: MetricsStore,
    patch_year: bool,
    done_tx: watch::Sender<bool>,
) {
    let mut senders = Vec::with_capacity(programs.len());
    let mut handles = Vec::with_capacity(programs.len());
    for program in programs {
        let (tx, rx) = mpsc::unbounded_channel::<Arc<str>>();
        handles.push(tokio::spawn(run_program(program, rx, store.clone(), patch_year)));
        senders.push(tx);
    }

    let mut count: u64 = 0;
    while let Some(line) = lines.recv().await {
        count += 1;
        let line: Arc<str> = line.into();
        for tx in &senders {
            let _ = tx.send(Arc::clone(&line));
        }
    }
    debug!(lines = count, "line conduit closed; draining programs");

    drop(senders);
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "program task failed");
        }
    }

    info!(lines = count, "all programs finished");
    let _ = done_tx.send(true);
}

async fn run_program(
    program: Arc<Program>,
    mut rx: mpsc::UnboundedReceiver<Arc<str>>,
    store: MetricsStore,
    patch_year: bool,
) {
    let mut processed: u64 = 0;
    let mut errors: u64 = 0;
    while let Some(line) = rx.recv().await {
        let outcome = program.execute(&line, &store, patch_year).await;
        processed += 1;
        errors += outcome.errors as u64;
    }
    debug!(program = %program.name(), processed, errors, "program finished");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use logwarp_core::conduit;

    use super::*;

    const COUNTER: &str = r#"
[[metrics]]
name = "NAME"
kind = "counter"

[[rules]]
pattern = 'hit'
actions = [{ op = "inc", metric = "NAME" }]
"#;

    fn write_prog(dir: &Path, file: &str, metric: &str) {
        std::fs::write(dir.join(file), COUNTER.replace("NAME", metric)).unwrap();
    }

    fn loader(store: &MetricsStore, lines: LineStream) -> Loader {
        Loader::new(LoaderOptions {
            store: store.clone(),
            lines,
            compile_only: false,
            dump_bytecode: false,
            syslog_use_current_year: true,
        })
    }

    #[tokio::test]
    async fn loads_directory_and_counts_failures() {
        let dir = tempfile::tempdir().unwrap();
        write_prog(dir.path(), "a.prog", "a_total");
        write_prog(dir.path(), "b.prog", "b_total");
        std::fs::write(dir.path().join("broken.prog"), "[[rules]]\npattern = '('\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = MetricsStore::new();
        let (_sink, stream) = conduit();
        let mut loader = loader(&store, stream);

        assert_eq!(loader.load_programs(dir.path()).await, 1);
        assert_eq!(loader.programs(), vec!["a.prog", "b.prog"]);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn single_file_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        write_prog(dir.path(), "only.prog", "only_total");

        let store = MetricsStore::new();
        let (_sink, stream) = conduit();
        let mut loader = loader(&store, stream);

        assert_eq!(loader.load_programs(dir.path().join("only.prog")).await, 0);
        assert_eq!(loader.programs(), vec!["only.prog"]);
    }

    #[tokio::test]
    async fn missing_path_is_one_error() {
        let store = MetricsStore::new();
        let (_sink, stream) = conduit();
        let mut loader = loader(&store, stream);
        assert_eq!(loader.load_programs("/definitely/not/here").await, 1);
    }

    #[tokio::test]
    async fn duplicate_metric_across_programs_fails_second() {
        let dir = tempfile::tempdir().unwrap();
        write_prog(dir.path(), "a.prog", "shared_total");
        write_prog(dir.path(), "b.prog", "shared_total");

        let store = MetricsStore::new();
        let (_sink, stream) = conduit();
        let mut loader = loader(&store, stream);

        assert_eq!(loader.load_programs(dir.path()).await, 1);
        assert_eq!(loader.programs(), vec!["a.prog"]);
        assert_eq!(store.get("shared_total").await.unwrap().program, "a.prog");
    }

    #[tokio::test]
    async fn compile_only_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_prog(dir.path(), "a.prog", "a_total");

        let store = MetricsStore::new();
        let (_sink, lines) = conduit();
        let mut loader = Loader::new(LoaderOptions {
            store: store.clone(),
            lines,
            compile_only: true,
            dump_bytecode: false,
            syslog_use_current_year: true,
        });

        assert_eq!(loader.load_programs(dir.path()).await, 0);
        assert!(loader.programs().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn dump_bytecode_keeps_listings_in_load_order() {
        let dir = tempfile::tempdir().unwrap();
        write_prog(dir.path(), "a.prog", "a_total");
        write_prog(dir.path(), "b.prog", "b_total");
        std::fs::write(dir.path().join("broken.prog"), "[[rules]]\npattern = '('\n").unwrap();

        let store = MetricsStore::new();
        let (_sink, lines) = conduit();
        let mut loader = Loader::new(LoaderOptions {
            store: store.clone(),
            lines,
            compile_only: true,
            dump_bytecode: true,
            syslog_use_current_year: true,
        });

        assert_eq!(loader.load_programs(dir.path()).await, 1);
        let listings = loader.listings();
        assert_eq!(listings.len(), 2);
        assert!(listings[0].starts_with("program a.prog\n"), "{}", listings[0]);
        assert!(listings[1].starts_with("program b.prog\n"), "{}", listings[1]);
        assert!(listings[0].contains("counter a_total"));
    }

    #[tokio::test]
    async fn listings_are_empty_without_dump_bytecode() {
        let dir = tempfile::tempdir().unwrap();
        write_prog(dir.path(), "a.prog", "a_total");

        let store = MetricsStore::new();
        let (_sink, stream) = conduit();
        let mut loader = loader(&store, stream);

        assert_eq!(loader.load_programs(dir.path()).await, 0);
        assert!(loader.listings().is_empty());
    }

    #[tokio::test]
    async fn done_fires_only_after_conduit_closes_and_lines_drain() {
        let dir = tempfile::tempdir().unwrap();
        write_prog(dir.path(), "a.prog", "a_total");
        write_prog(dir.path(), "b.prog", "b_total");

        let store = MetricsStore::new();
        let (sink, stream) = conduit();
        let mut loader = loader(&store, stream);
        loader.load_programs(dir.path()).await;
        loader.start().unwrap();

        for _ in 0..100 {
            sink.send("hit".to_string()).unwrap();
        }
        sink.send("miss".to_string()).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!loader.is_done());

        sink.close().unwrap();
        tokio::time::timeout(Duration::from_secs(5), loader.wait_done())
            .await
            .expect("engine should finish");
        assert!(loader.is_done());

        for name in ["a_total", "b_total"] {
            assert_eq!(store.get(name).await.unwrap().label_values[0].value, 100.0);
        }
    }

    #[tokio::test]
    async fn zero_programs_still_complete() {
        let store = MetricsStore::new();
        let (sink, stream) = conduit();
        let mut loader = loader(&store, stream);
        loader.start().unwrap();

        sink.send("anything".to_string()).unwrap();
        sink.close().unwrap();
        tokio::time::timeout(Duration::from_secs(5), loader.wait_done())
            .await
            .expect("engine should finish");
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let store = MetricsStore::new();
        let (_sink, stream) = conduit();
        let mut loader = loader(&store, stream);
        loader.start().unwrap();
        assert!(matches!(loader.start(), Err(LoaderError::AlreadyStarted)));
    }
}
