use crate::graph::Graph;
use crate::wasm::MethodSignature;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

/// Compact description of the shape of a graph
///
/// Nodes are first put in breadth first order. Then each node contributes its kind (`R`, `B`, or
/// `N`) followed by the indices of its successors, separated by `-`. Overly long fingerprints get
/// truncated and suffixed with a hash of the whole thing.
pub fn fingerprint(graph: &mut Graph, max_len: usize) -> String {
    graph.sort_breadth_first();
    let mut fingerprint = String::with_capacity(graph.len() * 5);
    for (_, node) in graph.iter() {
        fingerprint.push(node.kind.letter());
        for (output_idx, output) in node.outputs().enumerate() {
            if output_idx > 0 {
                fingerprint.push('-');
            }
            let _ = write!(fingerprint, "{}", graph[output].index);
        }
    }

    if fingerprint.len() > max_len {
        let hash = fingerprint
            .bytes()
            .fold(0u32, |hash, byte| hash.wrapping_mul(31).wrapping_add(byte as u32));
        fingerprint.truncate(max_len.saturating_sub(8));
        let _ = write!(fingerprint, "-{:x}", hash);
    }
    fingerprint
}

/// Receives graphs that could only be structured with the dispatch loop
///
/// These are the graphs worth looking at to find new patterns for the reducer.
pub trait Diagnostics {
    fn record_fallback(&self, fingerprint: &str, signature: &MethodSignature, dump: &[String]);
}

/// Discard all diagnostics
pub struct NoDiagnostics;

impl Diagnostics for NoDiagnostics {
    fn record_fallback(&self, _fingerprint: &str, _signature: &MethodSignature, _dump: &[String]) {
    }
}

/// Save fallback graphs into a folder, one file per fingerprint
///
/// The first method with a given fingerprint writes its signature, mangled name, and graph dump.
/// Later methods sharing the fingerprint only get their signature and mangled name appended.
/// Failures to write are logged and otherwise ignored.
pub struct GraphStore {
    folder: PathBuf,

    /// Lines of the files already written, by fingerprint
    files: Mutex<HashMap<String, HashSet<String>>>,
}

impl GraphStore {
    pub fn new(folder: impl Into<PathBuf>) -> GraphStore {
        GraphStore {
            folder: folder.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    fn file_path(&self, fingerprint: &str) -> PathBuf {
        self.folder.join(format!("{}.txt", fingerprint))
    }

    fn save(
        &self,
        fingerprint: &str,
        signature: &MethodSignature,
        dump: &[String],
    ) -> std::io::Result<()> {
        let mut files = match self.files.lock() {
            Ok(files) => files,
            Err(poisoned) => poisoned.into_inner(),
        };
        let path = self.file_path(fingerprint);
        let lines = files.entry(fingerprint.to_string()).or_insert_with(|| {
            fs::read_to_string(&path)
                .map(|text| text.lines().map(str::to_string).collect())
                .unwrap_or_default()
        });

        let signature_line = signature.to_string();
        if lines.is_empty() {
            fs::create_dir_all(&self.folder)?;
            let mut text = format!("{}\n{}\n", signature_line, signature.mangled_name());
            for line in dump {
                text.push_str(line);
                text.push('\n');
            }
            fs::write(&path, text)?;
            lines.extend(dump.iter().cloned());
        } else if !lines.contains(&signature_line) {
            let mut file = OpenOptions::new().append(true).open(&path)?;
            writeln!(file, "{}", signature_line)?;
            writeln!(file, "{}", signature.mangled_name())?;
        } else {
            return Ok(());
        }
        lines.insert(signature.mangled_name());
        lines.insert(signature_line);
        Ok(())
    }
}

impl Diagnostics for GraphStore {
    fn record_fallback(&self, fingerprint: &str, signature: &MethodSignature, dump: &[String]) {
        log::debug!("saving graph {} for {}", fingerprint, signature);
        if let Err(err) = self.save(fingerprint, signature, dump) {
            log::warn!(
                "failed to save graph {} for {}: {}",
                fingerprint,
                signature,
                err
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{Node, NodeKind};

    fn signature(name: &str) -> MethodSignature {
        MethodSignature {
            class: "pkg/Klass".to_string(),
            name: name.to_string(),
            descriptor: "()V".to_string(),
            results: vec![],
        }
    }

    fn diamond() -> Graph {
        let mut graph = Graph::new();
        let a = graph.add_node(Node::new(vec![], vec![], vec![]));
        let r = graph.add_node(Node::new(vec![], vec![], vec![]));
        let b = graph.add_node(Node::new(vec![], vec![], vec![]));
        let c = graph.add_node(Node::new(vec![], vec![], vec![]));
        graph.set_kind(
            a,
            NodeKind::Branch {
                if_true: b,
                if_false: c,
            },
        );
        graph.set_kind(b, NodeKind::Sequence { next: r });
        graph.set_kind(c, NodeKind::Sequence { next: r });
        graph
    }

    #[test]
    fn fingerprints() {
        let mut graph = diamond();
        assert_eq!(fingerprint(&mut graph, 80), "B1-2N3N3R");
        assert_eq!(fingerprint(&mut graph, 9), "B1-2N3N3R");

        let truncated = fingerprint(&mut graph, 8);
        assert!(truncated.starts_with('-'));
        assert!(u32::from_str_radix(&truncated[1..], 16).is_ok());
    }

    #[test]
    fn store_appends_new_signatures() {
        let folder = tempfile::tempdir().unwrap();
        let store = GraphStore::new(folder.path());
        let dump = vec!["line one".to_string(), "line two".to_string()];

        store.record_fallback("B1-2N3N3R", &signature("first"), &dump);
        store.record_fallback("B1-2N3N3R", &signature("second"), &dump);
        store.record_fallback("B1-2N3N3R", &signature("first"), &dump);

        let text = fs::read_to_string(folder.path().join("B1-2N3N3R.txt")).unwrap();
        assert_eq!(
            text.lines().collect::<Vec<_>>(),
            vec![
                "pkg/Klass.first()V",
                "pkg_Klass_first___V",
                "line one",
                "line two",
                "pkg/Klass.second()V",
                "pkg_Klass_second___V",
            ]
        );
    }

    #[test]
    fn store_failures_are_not_fatal() {
        let folder = tempfile::tempdir().unwrap();
        let blocker = folder.path().join("blocker");
        fs::write(&blocker, "not a folder").unwrap();
        let store = GraphStore::new(blocker.join("graphs"));
        store.record_fallback("R", &signature("first"), &[]);
    }
}
