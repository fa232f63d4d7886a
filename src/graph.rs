//! Task-graph recording for the visualizer toolchain.
//!
//! Compiled in by the `graph` cargo feature; without it every entry point
//! here is an inlineable no-op, so instrumented client code builds either
//! way.
//!
//! A recording is started by [`fork`] from within a task and stopped by
//! [`join`], which optionally dumps a `.dlg` file. While a recording is
//! active the workers feed it through exactly three hooks: a node is opened
//! at the start of every task invocation, an edge is recorded at every
//! submit/tail/continuation issued from a task, and the node is closed when
//! the invocation returns. Records go into per-worker fragments and are only
//! merged at dump time, keeping the hooks contention-free.
//!
//! Node descriptions ({file, line, function}) are registered once per call
//! site by [`graph_scope!`](crate::graph_scope); [`graph_label!`](crate::graph_label)
//! attaches a formatted label to the current invocation's node.

#[cfg(feature = "graph")]
mod recording {
    use crate::scheduler::Scheduler;
    use crate::task::Task;
    use crate::worker;
    use std::cell::Cell;
    use std::fmt;
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, OnceLock};
    use std::time::Instant;

    static NEXT_RECORDING_ID: AtomicU64 = AtomicU64::new(0);

    /// Registry of static node descriptions, one per instrumented call site.
    /// Index 0 is reserved for invocations that never called `graph_scope!`.
    static DESCRIPTIONS: Mutex<Vec<NodeDescription>> = Mutex::new(Vec::new());

    struct NodeDescription {
        file: &'static str,
        line: u32,
        func: &'static str,
    }

    /// An in-progress recording: one fragment per worker.
    pub struct Recording {
        id: u64,
        fragments: Box<[Mutex<Fragment>]>,
    }

    #[derive(Default)]
    struct Fragment {
        nodes: Vec<NodeRecord>,
        edges: Vec<EdgeRecord>,
        labels: String,
    }

    struct NodeRecord {
        begin_ns: u64,
        end_ns: u64,
        task: u32,
        desc: u32,
        label_offset: u32,
    }

    struct EdgeRecord {
        head: u32,
        tail: u32,
    }

    const NO_LABEL: u32 = u32::MAX;

    /// The node being recorded for the invocation currently on this thread's
    /// stack. Inline invocations nest, so open/close save and restore.
    #[derive(Clone, Copy)]
    pub struct OpenNode {
        begin_ns: u64,
        task: u32,
        desc: u32,
        label_offset: u32,
    }

    thread_local! {
        static CURRENT_NODE: Cell<Option<OpenNode>> = Cell::new(None);
    }

    fn now_ns() -> u64 {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }

    /// Description id 0 backs every node whose body never called
    /// `graph_scope!`; real call sites register from id 1 up.
    fn seed_unattributed(descriptions: &mut Vec<NodeDescription>) {
        if descriptions.is_empty() {
            descriptions.push(NodeDescription {
                file: "<unattributed>",
                line: 0,
                func: "<unattributed>",
            });
        }
    }

    fn register(file: &'static str, line: u32, func: &'static str) -> u32 {
        let mut descriptions = DESCRIPTIONS.lock().unwrap();
        seed_unattributed(&mut descriptions);
        descriptions.push(NodeDescription { file, line, func });
        (descriptions.len() - 1) as u32
    }

    /// Begin recording the task graph. Must be called from a task; panics if
    /// a recording is already active.
    pub fn fork() {
        worker::with_current("graph::fork", |sched, _| {
            seed_unattributed(&mut DESCRIPTIONS.lock().unwrap());
            let mut slot = sched.graph.write().unwrap();
            assert!(
                slot.is_none(),
                "squall::graph::fork: a recording is already active"
            );
            let fragments = (0..sched.workers.len())
                .map(|_| Mutex::new(Fragment::default()))
                .collect();
            *slot = Some(Arc::new(Recording {
                id: NEXT_RECORDING_ID.fetch_add(1, Ordering::Relaxed),
                fragments,
            }));
        })
    }

    /// Stop recording. With a prefix, the recording is written to
    /// `<prefix><recording-id>.dlg`; a failed write is fatal. Without an
    /// active recording this is a no-op.
    pub fn join(file_prefix: Option<&str>) {
        worker::with_current("graph::join", |sched, _| {
            let taken = sched.graph.write().unwrap().take();
            if let (Some(recording), Some(prefix)) = (taken, file_prefix) {
                if let Err(source) = dump(&recording, prefix) {
                    panic!("squall::graph::join failed to write recording: {source}");
                }
            }
        })
    }

    /// Attach a formatted label to the current invocation's node. Prefer the
    /// [`graph_label!`](crate::graph_label) macro.
    pub fn label(args: fmt::Arguments<'_>) {
        worker::with_current("graph::label", |sched, index| {
            CURRENT_NODE.with(|current| {
                let Some(mut node) = current.get() else { return };
                if let Some(recording) = sched.graph.read().unwrap().as_ref() {
                    let mut fragment = recording.fragments[index].lock().unwrap();
                    node.label_offset = fragment.labels.len() as u32;
                    fragment.labels.push_str(&args.to_string());
                    fragment.labels.push('\n');
                    current.set(Some(node));
                }
            })
        })
    }

    /// Called by [`graph_scope!`](crate::graph_scope): resolve the call
    /// site's description id (registering it on first use) and attach it to
    /// the current node.
    pub fn scope_with(
        desc: &'static OnceLock<u32>,
        file: &'static str,
        line: u32,
        func: &'static str,
    ) {
        let id = *desc.get_or_init(|| register(file, line, func));
        CURRENT_NODE.with(|current| {
            if let Some(mut node) = current.get() {
                node.desc = id;
                current.set(Some(node));
            }
        })
    }

    /// Hook: a task invocation is starting on worker `index`. Returns the
    /// node of the enclosing invocation, if any, for [`node_close`] to
    /// restore.
    pub(crate) fn node_open(
        sched: &Scheduler,
        _index: usize,
        task: *mut Task,
    ) -> Option<OpenNode> {
        let enclosing = CURRENT_NODE.with(|current| current.take());
        if sched.graph.read().unwrap().is_some() {
            CURRENT_NODE.with(|current| {
                current.set(Some(OpenNode {
                    begin_ns: now_ns(),
                    task: unsafe { (*task).id },
                    desc: 0,
                    label_offset: NO_LABEL,
                }))
            });
        }
        enclosing
    }

    /// Hook: the invocation opened by the matching [`node_open`] returned.
    pub(crate) fn node_close(sched: &Scheduler, index: usize, enclosing: Option<OpenNode>) {
        if let Some(node) = CURRENT_NODE.with(|current| current.take()) {
            if let Some(recording) = sched.graph.read().unwrap().as_ref() {
                recording.fragments[index].lock().unwrap().nodes.push(NodeRecord {
                    begin_ns: node.begin_ns,
                    end_ns: now_ns(),
                    task: node.task,
                    desc: node.desc,
                    label_offset: node.label_offset,
                });
            }
        }
        CURRENT_NODE.with(|current| current.set(enclosing));
    }

    /// Hook: the current invocation scheduled `task` (submit, tail,
    /// continuation, swap or release).
    pub(crate) fn record_edge(sched: &Scheduler, index: usize, task: std::ptr::NonNull<Task>) {
        let Some(node) = CURRENT_NODE.with(|current| current.get()) else {
            return;
        };
        if let Some(recording) = sched.graph.read().unwrap().as_ref() {
            recording.fragments[index].lock().unwrap().edges.push(EdgeRecord {
                head: node.task,
                tail: unsafe { (*task.as_ptr()).id },
            });
        }
    }

    fn dump(recording: &Recording, prefix: &str) -> std::io::Result<()> {
        let path = format!("{prefix}{}.dlg", recording.id);
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);

        {
            let descriptions = DESCRIPTIONS.lock().unwrap();
            writeln!(out, "{} node descriptions", descriptions.len())?;
            for desc in descriptions.iter() {
                writeln!(out, "{}", desc.file)?;
                writeln!(out, "{}", desc.line)?;
                writeln!(out, "{}", desc.func)?;
            }
        }

        let fragments: Vec<_> = recording
            .fragments
            .iter()
            .map(|fragment| fragment.lock().unwrap())
            .collect();

        let total_edges: usize = fragments.iter().map(|f| f.edges.len()).sum();
        writeln!(out, "{total_edges} edges")?;
        for fragment in fragments.iter() {
            for edge in fragment.edges.iter() {
                writeln!(out, "{} {}", edge.head, edge.tail)?;
            }
        }

        let total_nodes: usize = fragments.iter().map(|f| f.nodes.len()).sum();
        writeln!(out, "{total_nodes} nodes")?;
        for (index, fragment) in fragments.iter().enumerate() {
            for node in fragment.nodes.iter() {
                let label = if node.label_offset == NO_LABEL {
                    ""
                } else {
                    let rest = &fragment.labels[node.label_offset as usize..];
                    rest.split('\n').next().unwrap_or("")
                };
                writeln!(out, "{label}")?;
                writeln!(
                    out,
                    "{index} {} {} {} {}",
                    node.task, node.desc, node.begin_ns, node.end_ns
                )?;
            }
        }

        out.flush()
    }
}

#[cfg(feature = "graph")]
pub use recording::{fork, join, label, scope_with, Recording};

#[cfg(feature = "graph")]
pub(crate) use recording::{node_close, node_open, record_edge};

/// No-op without the `graph` feature.
#[cfg(not(feature = "graph"))]
pub fn fork() {}

/// No-op without the `graph` feature.
#[cfg(not(feature = "graph"))]
pub fn join(_file_prefix: Option<&str>) {}

/// No-op without the `graph` feature.
#[cfg(not(feature = "graph"))]
pub fn label(_args: std::fmt::Arguments<'_>) {}

/// Register this call site as the node description of the current task
/// invocation. Call it at the top of a task body, passing the function name.
/// Expands to nothing without the `graph` feature.
#[cfg(feature = "graph")]
#[macro_export]
macro_rules! graph_scope {
    ($func:expr) => {{
        static SQUALL_DESC_ID: ::std::sync::OnceLock<u32> = ::std::sync::OnceLock::new();
        $crate::graph::scope_with(&SQUALL_DESC_ID, ::core::file!(), ::core::line!(), $func);
    }};
}

/// Register this call site as the node description of the current task
/// invocation. Call it at the top of a task body, passing the function name.
/// Expands to nothing without the `graph` feature.
#[cfg(not(feature = "graph"))]
#[macro_export]
macro_rules! graph_scope {
    ($func:expr) => {{
        let _ = $func;
    }};
}

/// Label the current task invocation's node with `format!`-style arguments.
/// Expands to nothing without the `graph` feature.
#[cfg(feature = "graph")]
#[macro_export]
macro_rules! graph_label {
    ($($arg:tt)+) => {
        $crate::graph::label(::core::format_args!($($arg)+))
    };
}

/// Label the current task invocation's node with `format!`-style arguments.
/// Expands to nothing without the `graph` feature.
#[cfg(not(feature = "graph"))]
#[macro_export]
macro_rules! graph_label {
    ($($arg:tt)+) => {{}};
}

#[cfg(all(test, feature = "graph"))]
mod tests {
    use crate::task::Task;
    use crate::{graph_label, graph_scope};
    use std::sync::atomic::{AtomicU32, Ordering};

    static ROUNDS: AtomicU32 = AtomicU32::new(0);

    fn spin_run(task: *mut Task) {
        graph_scope!("spin_run");
        let round = ROUNDS.fetch_add(1, Ordering::SeqCst);
        match round {
            0 => {
                crate::graph::fork();
                graph_label!("round {round}");
                unsafe { crate::tail(task) };
            }
            1 => {
                graph_label!("round {round}");
                unsafe { crate::tail(task) };
            }
            _ => {
                crate::graph::join(None);
                crate::terminate();
            }
        }
    }

    #[test]
    fn test_recording_spans_tail_recursion() {
        ROUNDS.store(0, Ordering::SeqCst);
        let mut spinner = Task::new(spin_run);
        unsafe {
            crate::run_with(&mut spinner, None, None, 2).unwrap();
        }
        assert_eq!(ROUNDS.load(Ordering::SeqCst), 3);
    }
}
