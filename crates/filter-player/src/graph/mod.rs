//! Audio filter graph: source → gain → normalize → sink.
//!
//! The topology never changes, so the graph is a fixed chain of [`Node`] variants rather
//! than a general DAG engine. A [`FilterGraph`] can only be obtained from
//! [`GraphBuilder::configure`], which creates, links and validates all four nodes; there
//! is no way to push into a half-built graph.
//!
//! Frames go in with [`FilterGraph::push`] and come out of the sink via
//! [`FilterGraph::pull_all`]. [`FilterGraph::finish`] signals end of stream so the
//! normalize stage can flush its resampler.

mod node;
mod normalize;

pub use node::SinkPoll;

use crate::config;
use crate::error::{FilterReadError, FilterWriteError, GraphInitError};
use crate::format::SourceFormat;
use crate::frame::{DecodedFrame, FilteredFrame};
use node::{GainNode, Node, Signal, SinkNode, SourceNode};
use normalize::NormalizeNode;

/// Collects graph parameters before configuration.
#[derive(Clone, Debug)]
pub struct GraphBuilder {
    source: SourceFormat,
    volume: f64,
    chunk_frames: usize,
}

impl GraphBuilder {
    pub fn new(source: SourceFormat) -> Self {
        Self {
            source,
            volume: config::VOLUME,
            chunk_frames: config::RESAMPLE_CHUNK_FRAMES,
        }
    }

    /// Override the gain multiplier (the player always uses [`config::VOLUME`]).
    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    /// Resampler input chunk size in frames.
    pub fn chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames;
        self
    }

    /// Create the four nodes, link them in order and validate the chain.
    pub fn configure(self) -> Result<FilterGraph, GraphInitError> {
        tracing::info!(args = %self.source, "source");
        tracing::info!(volume = self.volume, "gain");
        tracing::info!(args = %crate::format::TARGET, "normalize");

        let nodes = vec![
            Node::Source(SourceNode::new(self.source)?),
            Node::Gain(GainNode::new(self.volume, &self.source)?),
            Node::Normalize(NormalizeNode::new(&self.source, self.chunk_frames)?),
            Node::Sink(SinkNode::default()),
        ];

        let mut linked = vec![false; nodes.len().saturating_sub(1)];
        for i in 0..linked.len() {
            link(&nodes[i], &nodes[i + 1])?;
            linked[i] = true;
        }
        validate(&nodes, &linked)?;

        Ok(FilterGraph {
            nodes,
            failed: None,
        })
    }
}

fn link(from: &Node, to: &Node) -> Result<(), GraphInitError> {
    let fail = |reason: String| GraphInitError::Link {
        from: from.name(),
        to: to.name(),
        reason,
    };
    let out = from
        .output()
        .ok_or_else(|| fail("upstream has no output pad".into()))?;
    let input = to
        .input()
        .ok_or_else(|| fail("downstream has no input pad".into()))?;
    if out != input {
        return Err(fail(format!("format mismatch {out:?} vs {input:?}")));
    }
    Ok(())
}

fn validate(nodes: &[Node], linked: &[bool]) -> Result<(), GraphInitError> {
    if !matches!(nodes.first(), Some(Node::Source(_))) {
        return Err(GraphInitError::Config("chain must start with a source".into()));
    }
    if !matches!(nodes.last(), Some(Node::Sink(_))) {
        return Err(GraphInitError::Config("chain must end with a sink".into()));
    }
    if let Some(pos) = linked.iter().position(|l| !l) {
        return Err(GraphInitError::Config(format!(
            "output of {} is not connected",
            nodes[pos].name()
        )));
    }
    Ok(())
}

/// A configured, ready-to-use filter chain.
pub struct FilterGraph {
    nodes: Vec<Node>,
    failed: Option<String>,
}

impl FilterGraph {
    /// Build the standard player graph for `source` (volume 0.90, target format).
    pub fn configure(source: SourceFormat) -> Result<Self, GraphInitError> {
        GraphBuilder::new(source).configure()
    }

    /// Feed one decoded frame into the source node.
    ///
    /// A rejected frame leaves the graph untouched. Processing failures further down the
    /// chain are reported by the next pull.
    pub fn push(&mut self, frame: DecodedFrame) -> Result<(), FilterWriteError> {
        let signal = match self.nodes.first_mut() {
            Some(Node::Source(src)) => src.accept(frame)?,
            _ => return Err(FilterWriteError::Malformed("graph has no source".into())),
        };
        self.run(signal);
        Ok(())
    }

    /// Signal end of stream; afterwards the sink yields the remaining tail, then `Eof`.
    pub fn finish(&mut self) -> Result<(), FilterWriteError> {
        let signal = match self.nodes.first_mut() {
            Some(Node::Source(src)) => src.finish()?,
            _ => return Err(FilterWriteError::Malformed("graph has no source".into())),
        };
        self.run(signal);
        Ok(())
    }

    fn run(&mut self, signal: Signal) {
        if self.failed.is_some() {
            return;
        }
        let mut pending = vec![signal];
        for node in self.nodes.iter_mut().skip(1) {
            let mut next = Vec::new();
            for s in pending {
                match node.process(s) {
                    Ok(out) => next.extend(out),
                    Err(e) => {
                        tracing::error!(node = node.name(), "filter failed: {e}");
                        self.failed = Some(format!("{}: {e}", node.name()));
                        return;
                    }
                }
            }
            pending = next;
        }
    }

    /// Pull a single frame from the sink.
    pub fn poll(&mut self) -> Result<SinkPoll, FilterReadError> {
        if let Some(e) = &self.failed {
            return Err(FilterReadError(e.clone()));
        }
        match self.nodes.last_mut() {
            Some(Node::Sink(sink)) => Ok(sink.poll()),
            _ => Err(FilterReadError("graph has no sink".into())),
        }
    }

    /// Drain everything the sink currently holds.
    ///
    /// The iterator ends on "no more output right now" or end of stream; call again after
    /// the next push.
    pub fn pull_all(&mut self) -> Drain<'_> {
        Drain {
            graph: self,
            done: false,
        }
    }

    /// Whether the sink has delivered its final frame after [`FilterGraph::finish`].
    pub fn is_eof(&self) -> bool {
        matches!(self.nodes.last(), Some(Node::Sink(sink)) if sink.is_eof())
    }
}

/// Iterator returned by [`FilterGraph::pull_all`].
pub struct Drain<'g> {
    graph: &'g mut FilterGraph,
    done: bool,
}

impl Iterator for Drain<'_> {
    type Item = Result<FilteredFrame, FilterReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.graph.poll() {
            Ok(SinkPoll::Frame(frame)) => Some(Ok(frame)),
            Ok(SinkPoll::Again) | Ok(SinkPoll::Eof) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
