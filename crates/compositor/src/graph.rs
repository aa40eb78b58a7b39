//! Structured filter graph
//!
//! Graphs are built as an ordered list of [`FilterNode`]s and only turned into
//! ffmpeg's `-filter_complex` text at the executor boundary. Every graph owns its
//! own label counter, so sub-graphs composed into one request can never collide
//! and nothing is shared between concurrent requests.

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("pad [{label}] is consumed by node {node} but never produced before it")]
    DanglingInput { label: String, node: usize },

    #[error("pad [{label}] is produced more than once (node {node})")]
    ProducedTwice { label: String, node: usize },

    #[error("pad [{label}] is consumed more than once (node {node})")]
    ConsumedTwice { label: String, node: usize },

    #[error("pad [{0}] is produced but never consumed or mapped")]
    Unconsumed(String),

    #[error("terminal pad [{0}] is missing or consumed inside the graph")]
    BadTerminal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn specifier(&self) -> &'static str {
        match self {
            StreamKind::Video => "v",
            StreamKind::Audio => "a",
        }
    }
}

/// Named edge between two filter nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PadLabel(String);

impl PadLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PadLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

/// Either a raw input stream (`[2:v]`) or a label produced inside the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pad {
    Input { index: usize, stream: StreamKind },
    Label(PadLabel),
}

impl Pad {
    pub fn video(index: usize) -> Self {
        Pad::Input { index, stream: StreamKind::Video }
    }

    pub fn audio(index: usize) -> Self {
        Pad::Input { index, stream: StreamKind::Audio }
    }
}

impl From<PadLabel> for Pad {
    fn from(label: PadLabel) -> Self {
        Pad::Label(label)
    }
}

impl From<&PadLabel> for Pad {
    fn from(label: &PadLabel) -> Self {
        Pad::Label(label.clone())
    }
}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pad::Input { index, stream } => write!(f, "[{}:{}]", index, stream.specifier()),
            Pad::Label(label) => label.fmt(f),
        }
    }
}

/// One filter-chain statement: `[in0][in1]filter,filter[out0][out1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub inputs: Vec<Pad>,
    pub filter: String,
    pub outputs: Vec<PadLabel>,
}

impl FilterNode {
    /// Names of the filters chained in this statement, in order.
    pub fn stages(&self) -> Vec<&str> {
        split_stages(&self.filter)
            .into_iter()
            .map(|stage| {
                let end = stage.find('=').unwrap_or(stage.len());
                stage[..end].trim()
            })
            .collect()
    }
}

impl fmt::Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pad in &self.inputs {
            pad.fmt(f)?;
        }
        f.write_str(&self.filter)?;
        for label in &self.outputs {
            label.fmt(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterGraph {
    nodes: Vec<FilterNode>,
    next_label: usize,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh label. The counter is monotonic across all prefixes.
    pub fn label(&mut self, prefix: &str) -> PadLabel {
        let label = PadLabel(format!("{}{}", prefix, self.next_label));
        self.next_label += 1;
        label
    }

    pub fn push<I, P>(&mut self, inputs: I, filter: impl Into<String>, outputs: Vec<PadLabel>)
    where
        I: IntoIterator<Item = P>,
        P: Into<Pad>,
    {
        self.nodes.push(FilterNode {
            inputs: inputs.into_iter().map(Into::into).collect(),
            filter: filter.into(),
            outputs,
        });
    }

    /// Push a single-output statement and return its freshly allocated label.
    pub fn chain<I, P>(&mut self, inputs: I, filter: impl Into<String>, prefix: &str) -> PadLabel
    where
        I: IntoIterator<Item = P>,
        P: Into<Pad>,
    {
        let out = self.label(prefix);
        self.push(inputs, filter, vec![out.clone()]);
        out
    }

    /// Source statement with no inputs, e.g. `anullsrc`.
    pub fn source(&mut self, filter: impl Into<String>, prefix: &str) -> PadLabel {
        self.chain(Vec::<Pad>::new(), filter, prefix)
    }

    pub fn nodes(&self) -> &[FilterNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of statements that run the named filter at least once.
    pub fn count_filter(&self, name: &str) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.stages().contains(&name))
            .count()
    }

    /// Check the wiring invariant: every label input is produced by exactly one
    /// earlier node and consumed once, and the only unconsumed outputs are the
    /// terminals that get mapped to the output file.
    pub fn validate(&self, terminals: &[&PadLabel]) -> Result<(), GraphError> {
        let mut produced: HashMap<&PadLabel, usize> = HashMap::new();
        let mut consumed: HashSet<&PadLabel> = HashSet::new();

        for (node_index, node) in self.nodes.iter().enumerate() {
            for pad in &node.inputs {
                if let Pad::Label(label) = pad {
                    if !produced.contains_key(label) {
                        return Err(GraphError::DanglingInput {
                            label: label.as_str().to_string(),
                            node: node_index,
                        });
                    }
                    if !consumed.insert(label) {
                        return Err(GraphError::ConsumedTwice {
                            label: label.as_str().to_string(),
                            node: node_index,
                        });
                    }
                }
            }
            for label in &node.outputs {
                if produced.insert(label, node_index).is_some() {
                    return Err(GraphError::ProducedTwice {
                        label: label.as_str().to_string(),
                        node: node_index,
                    });
                }
            }
        }

        for terminal in terminals {
            if !produced.contains_key(terminal) || consumed.contains(terminal) {
                return Err(GraphError::BadTerminal(terminal.as_str().to_string()));
            }
        }

        for node in &self.nodes {
            for label in &node.outputs {
                if !consumed.contains(label) && !terminals.contains(&label) {
                    return Err(GraphError::Unconsumed(label.as_str().to_string()));
                }
            }
        }

        Ok(())
    }

    /// Textual `-filter_complex` form, statements joined by `;`.
    pub fn to_filter_complex(&self) -> String {
        self.nodes
            .iter()
            .map(|node| node.to_string())
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_filter_complex())
    }
}

/// Split a chain on top-level commas, ignoring `\,` and quoted sections.
fn split_stages(chain: &str) -> Vec<&str> {
    let mut stages = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in chain.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '\'' => quoted = !quoted,
            ',' if !quoted => {
                stages.push(&chain[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    stages.push(&chain[start..]);
    stages
}

/// Format seconds the way every builder writes them into filter arguments.
pub fn secs(value: f64) -> String {
    format!("{:.3}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_unique_across_prefixes() {
        let mut graph = FilterGraph::new();
        let a = graph.label("v");
        let b = graph.label("a");
        let c = graph.label("v");
        assert_eq!(a.as_str(), "v0");
        assert_eq!(b.as_str(), "a1");
        assert_eq!(c.as_str(), "v2");
    }

    #[test]
    fn serializes_statements_in_order() {
        let mut graph = FilterGraph::new();
        let v = graph.chain([Pad::video(0)], "scale=1920:1080", "v");
        let out = graph.chain(
            [Pad::from(&v), Pad::video(1)],
            "xfade=transition=fade:duration=1.000:offset=2.000",
            "vout",
        );
        assert_eq!(
            graph.to_filter_complex(),
            "[0:v]scale=1920:1080[v0];[v0][1:v]xfade=transition=fade:duration=1.000:offset=2.000[vout1]"
        );
        assert!(graph.validate(&[&out]).is_ok());
    }

    #[test]
    fn rejects_dangling_input() {
        let mut graph = FilterGraph::new();
        let ghost = graph.label("ghost");
        let out = graph.chain([ghost], "null", "v");
        assert!(matches!(
            graph.validate(&[&out]),
            Err(GraphError::DanglingInput { .. })
        ));
    }

    #[test]
    fn rejects_double_consumption() {
        let mut graph = FilterGraph::new();
        let v = graph.chain([Pad::video(0)], "null", "v");
        let a = graph.chain([&v], "null", "x");
        let b = graph.chain([&v], "null", "y");
        assert!(matches!(
            graph.validate(&[&a, &b]),
            Err(GraphError::ConsumedTwice { .. })
        ));
    }

    #[test]
    fn rejects_unmapped_output() {
        let mut graph = FilterGraph::new();
        let left = graph.label("l");
        let right = graph.label("r");
        graph.push([Pad::video(0)], "split=2", vec![left.clone(), right]);
        assert_eq!(
            graph.validate(&[&left]),
            Err(GraphError::Unconsumed("r1".to_string()))
        );
    }

    #[test]
    fn rejects_missing_terminal() {
        let mut graph = FilterGraph::new();
        let v = graph.chain([Pad::video(0)], "null", "v");
        let never = graph.label("never");
        assert!(matches!(
            graph.validate(&[&v, &never]),
            Err(GraphError::BadTerminal(_))
        ));
    }

    #[test]
    fn stages_ignore_quoted_commas() {
        let node = FilterNode {
            inputs: vec![],
            filter: "zoompan=z='min(zoom+0.001,1.5)':d=1,scale=1920:1080,fps=30".to_string(),
            outputs: vec![],
        };
        assert_eq!(node.stages(), vec!["zoompan", "scale", "fps"]);
    }
}
