//! Editable node graph and its render-safe snapshot.
//!
//! The UI thread owns a live [`NodeGraph`] behind `Arc<RwLock<..>>` and edits it
//! freely. Rendering never touches it: the backend captures a
//! [`GraphSnapshot`], a deep copy of everything reachable from the output node,
//! and hands that to workers as an `Arc`. Workers evaluate it without locks.
//!
//! Two revision counters tell the backend what kind of edit happened:
//! - `structure_revision`: nodes added/removed, connections changed, output
//!   changed. Needs a recompile and yields a new cache identity.
//! - `value_revision`: parameter values or keyframes changed. Values are
//!   re-synced into the current snapshot; the identity stays, per-frame hashes
//!   change.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

use super::decoder::SourceProvider;
use super::frame::{Frame, SampleBuffer};
use super::params::{AudioParams, VideoParams};
use super::rational::{Rational, time_to_timestamp};
use crate::core::time_range::TimeRange;
use crate::error::RenderError;

// Input names used by the built-in node kinds
pub const IN_INPUT: &str = "input";
pub const IN_A: &str = "a";
pub const IN_B: &str = "b";
pub const IN_MIX: &str = "mix";
pub const IN_COLOR: &str = "color";
pub const IN_GAIN: &str = "gain";
pub const IN_OFFSET: &str = "offset";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Decoded source stream, addressed by source id
    Footage { source: String },
    /// Constant color (`color`)
    Solid,
    /// `a` over `b` by `mix`
    Blend,
    /// `input * gain + offset` on RGB
    Tone,
    /// Graph output; passes `input` through
    ViewerOutput,
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Footage { .. } => "Footage",
            NodeKind::Solid => "Solid",
            NodeKind::Blend => "Blend",
            NodeKind::Tone => "Tone",
            NodeKind::ViewerOutput => "ViewerOutput",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Float(f64),
    Color([f32; 4]),
}

impl Value {
    fn lerp(&self, other: &Value, t: f64) -> Value {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => Value::Float(a + (b - a) * t),
            (Value::Color(a), Value::Color(b)) => {
                let mut out = [0.0; 4];
                for c in 0..4 {
                    out[c] = a[c] + (b[c] - a[c]) * t as f32;
                }
                Value::Color(out)
            }
            // Mismatched kinds hold the earlier key
            _ => *self,
        }
    }

    fn as_float(&self) -> f64 {
        match self {
            Value::Float(v) => *v,
            Value::Color(c) => c[0] as f64,
        }
    }

    fn digest_into(&self, hasher: &mut Sha256) {
        match self {
            Value::Float(v) => {
                hasher.update(b"f");
                hasher.update(v.to_bits().to_le_bytes());
            }
            Value::Color(c) => {
                hasher.update(b"c");
                c.iter().for_each(|v| hasher.update(v.to_bits().to_le_bytes()));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: Rational,
    pub value: Value,
}

impl Keyframe {
    pub fn new(time: Rational, value: Value) -> Self {
        Self { time, value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Input {
    Constant(Value),
    /// Sorted by time; linear between keys, held outside
    Keyframed(Vec<Keyframe>),
    Connection(NodeId),
}

impl Input {
    /// Parameter value at `time`. Connections have no scalar value.
    pub fn value_at(&self, time: Rational) -> Option<Value> {
        match self {
            Input::Constant(v) => Some(*v),
            Input::Keyframed(keys) => {
                let first = keys.first()?;
                if time <= first.time {
                    return Some(first.value);
                }
                let idx = keys.partition_point(|k| k.time <= time);
                if idx >= keys.len() {
                    return keys.last().map(|k| k.value);
                }
                let (a, b) = (&keys[idx - 1], &keys[idx]);
                let t = ((time - a.time) / (b.time - a.time)).to_f64();
                Some(a.value.lerp(&b.value, t))
            }
            Input::Connection(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub inputs: BTreeMap<String, Input>,
}

impl Node {
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.get(name)
    }

    fn connections(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inputs.values().filter_map(|i| match i {
            Input::Connection(id) => Some(*id),
            _ => None,
        })
    }
}

/// The live, editable graph.
#[derive(Debug, Clone, Default)]
pub struct NodeGraph {
    nodes: IndexMap<NodeId, Node>,
    output: Option<NodeId>,
    structure_rev: u64,
    value_rev: u64,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId::new();
        let is_output = kind == NodeKind::ViewerOutput;
        self.nodes.insert(id, Node { id, name: name.into(), kind, inputs: BTreeMap::new() });
        if is_output && self.output.is_none() {
            self.output = Some(id);
        }
        self.structure_rev += 1;
        id
    }

    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.shift_remove(&id)?;
        if self.output == Some(id) {
            self.output = None;
        }
        self.structure_rev += 1;
        Some(node)
    }

    pub fn set_output(&mut self, id: NodeId) {
        if self.output != Some(id) {
            self.output = Some(id);
            self.structure_rev += 1;
        }
    }

    pub fn output(&self) -> Option<NodeId> {
        self.output
    }

    /// Connect `src` into `dst.input`. Dangling ids are accepted here and
    /// rejected at capture time.
    pub fn connect(&mut self, dst: NodeId, input: &str, src: NodeId) {
        if let Some(node) = self.nodes.get_mut(&dst) {
            node.inputs.insert(input.to_string(), Input::Connection(src));
            self.structure_rev += 1;
        }
    }

    pub fn disconnect(&mut self, dst: NodeId, input: &str) {
        if let Some(node) = self.nodes.get_mut(&dst) {
            if matches!(node.inputs.remove(input), Some(Input::Connection(_))) {
                self.structure_rev += 1;
            }
        }
    }

    pub fn set_value(&mut self, id: NodeId, input: &str, value: Value) {
        self.set_input(id, input, Input::Constant(value));
    }

    pub fn set_keyframes(&mut self, id: NodeId, input: &str, mut keys: Vec<Keyframe>) {
        keys.sort_by(|a, b| a.time.cmp(&b.time));
        self.set_input(id, input, Input::Keyframed(keys));
    }

    fn set_input(&mut self, id: NodeId, input: &str, value: Input) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        // Replacing a connection by a value is a structural edit
        let was_connection = matches!(node.inputs.get(input), Some(Input::Connection(_)));
        node.inputs.insert(input.to_string(), value);
        if was_connection {
            self.structure_rev += 1;
        } else {
            self.value_rev += 1;
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn structure_revision(&self) -> u64 {
        self.structure_rev
    }

    pub fn value_revision(&self) -> u64 {
        self.value_rev
    }
}

/// Immutable render-side copy of the reachable subgraph.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    nodes: HashMap<NodeId, Node>,
    /// Nodes sorted by id for deterministic hashing
    order: Vec<NodeId>,
    output: NodeId,
    video: VideoParams,
    audio: AudioParams,
    identity: String,
    structure_rev: u64,
    value_rev: u64,
}

impl GraphSnapshot {
    /// Deep-copy everything reachable from the graph's output node.
    pub fn capture(graph: &NodeGraph, video: VideoParams, audio: AudioParams) -> Result<Self, RenderError> {
        let output = graph
            .output()
            .ok_or_else(|| RenderError::Compile("graph has no output node".into()))?;

        let mut nodes = HashMap::new();
        let mut visiting = HashSet::new();
        collect(graph, output, &mut visiting, &mut nodes)?;

        let mut order: Vec<NodeId> = nodes.keys().copied().collect();
        order.sort_unstable();

        let mut snapshot = Self {
            nodes,
            order,
            output,
            video,
            audio,
            identity: String::new(),
            structure_rev: graph.structure_revision(),
            value_rev: graph.value_revision(),
        };
        snapshot.identity = snapshot.compute_identity();
        Ok(snapshot)
    }

    /// Copy current parameter values from the live graph. Structure must be
    /// unchanged since capture; otherwise the caller has to recompile.
    pub fn with_values_from(&self, graph: &NodeGraph) -> Option<Self> {
        if graph.structure_revision() != self.structure_rev {
            return None;
        }
        let mut next = self.clone();
        for (id, node) in next.nodes.iter_mut() {
            if let Some(live) = graph.node(*id) {
                node.inputs = live.inputs.clone();
            }
        }
        next.value_rev = graph.value_revision();
        Some(next)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn video_params(&self) -> &VideoParams {
        &self.video
    }

    pub fn audio_params(&self) -> &AudioParams {
        &self.audio
    }

    pub fn structure_revision(&self) -> u64 {
        self.structure_rev
    }

    pub fn value_revision(&self) -> u64 {
        self.value_rev
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All footage source ids the snapshot reads.
    pub fn sources(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|id| match &self.nodes[id].kind {
                NodeKind::Footage { source } => Some(source.clone()),
                _ => None,
            })
            .collect()
    }

    /// Topology and render parameters. Parameter values are excluded: they
    /// only affect per-frame hashes.
    fn compute_identity(&self) -> String {
        let mut hasher = Sha256::new();
        self.video.digest_into(&mut hasher);
        self.audio.digest_into(&mut hasher);
        hasher.update(self.output.0.as_bytes());
        for id in &self.order {
            let node = &self.nodes[id];
            hasher.update(id.0.as_bytes());
            hasher.update(node.kind.type_name().as_bytes());
            if let NodeKind::Footage { source } = &node.kind {
                hasher.update(source.as_bytes());
            }
            for (name, input) in &node.inputs {
                hasher.update(name.as_bytes());
                match input {
                    Input::Connection(src) => hasher.update(src.0.as_bytes()),
                    _ => hasher.update(b"param"),
                }
            }
        }
        hex(&hasher.finalize())
    }

    /// Content hash of the frame at `time`. Equal hashes mean identical
    /// pixels, across times and across sessions.
    pub fn frame_hash(&self, time: Rational) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.identity.as_bytes());
        for id in &self.order {
            let node = &self.nodes[id];
            hasher.update(id.0.as_bytes());
            if let NodeKind::Footage { source } = &node.kind {
                hasher.update(source.as_bytes());
                hasher.update(time_to_timestamp(time, self.video.timebase).to_le_bytes());
            }
            for (name, input) in &node.inputs {
                if let Some(value) = input.value_at(time) {
                    hasher.update(name.as_bytes());
                    value.digest_into(&mut hasher);
                }
            }
        }
        hex(&hasher.finalize())
    }

    pub fn render_video(&self, time: Rational, sources: &dyn SourceProvider) -> Result<Frame, RenderError> {
        let frame = self.eval_video(self.output, time, sources)?;
        Ok(frame.with_time(time))
    }

    pub fn render_audio(&self, range: TimeRange, sources: &dyn SourceProvider) -> Result<SampleBuffer, RenderError> {
        self.eval_audio(self.output, range, sources)
    }

    fn node(&self, id: NodeId) -> Result<&Node, RenderError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| RenderError::Render(format!("node {} not in snapshot", id)))
    }

    fn param(&self, node: &Node, name: &str, time: Rational, default: f64) -> f64 {
        node.input(name).and_then(|i| i.value_at(time)).map(|v| v.as_float()).unwrap_or(default)
    }

    fn eval_video(&self, id: NodeId, time: Rational, sources: &dyn SourceProvider) -> Result<Frame, RenderError> {
        let node = self.node(id)?;
        let (w, h) = (self.video.width, self.video.height);

        match &node.kind {
            NodeKind::Footage { source } => sources.decoder(source)?.decode_video(time, &self.video),
            NodeKind::Solid => {
                let color = match node.input(IN_COLOR).and_then(|i| i.value_at(time)) {
                    Some(Value::Color(c)) => c,
                    Some(Value::Float(v)) => [v as f32, v as f32, v as f32, 1.0],
                    None => [0.0, 0.0, 0.0, 1.0],
                };
                Ok(fill(w, h, &self.video, color))
            }
            NodeKind::Blend => {
                let a = self.eval_image_input(node, IN_A, time, sources)?;
                let b = self.eval_image_input(node, IN_B, time, sources)?;
                let mix = self.param(node, IN_MIX, time, 0.5).clamp(0.0, 1.0) as f32;
                let mut out = Frame::new(w, h, self.video.format);
                for y in 0..h {
                    for x in 0..w {
                        let pa = a.pixel(x, y);
                        let pb = b.pixel(x, y);
                        let mut px = [0.0; 4];
                        for c in 0..4 {
                            px[c] = pb[c] + (pa[c] - pb[c]) * mix;
                        }
                        out.set_pixel(x, y, px);
                    }
                }
                Ok(out)
            }
            NodeKind::Tone => {
                let src = self.eval_image_input(node, IN_INPUT, time, sources)?;
                let gain = self.param(node, IN_GAIN, time, 1.0) as f32;
                let offset = self.param(node, IN_OFFSET, time, 0.0) as f32;
                let mut out = Frame::new(w, h, self.video.format);
                for y in 0..h {
                    for x in 0..w {
                        let mut px = src.pixel(x, y);
                        for c in px.iter_mut().take(3) {
                            *c = *c * gain + offset;
                        }
                        out.set_pixel(x, y, px);
                    }
                }
                Ok(out)
            }
            NodeKind::ViewerOutput => self.eval_image_input(node, IN_INPUT, time, sources),
        }
    }

    /// Image input: connection renders upstream, a constant color fills,
    /// anything else is transparent black.
    fn eval_image_input(
        &self,
        node: &Node,
        name: &str,
        time: Rational,
        sources: &dyn SourceProvider,
    ) -> Result<Frame, RenderError> {
        let (w, h) = (self.video.width, self.video.height);
        match node.input(name) {
            Some(Input::Connection(src)) => {
                let frame = self.eval_video(*src, time, sources)?;
                if frame.width() != w || frame.height() != h {
                    return Err(RenderError::Render(format!(
                        "{} produced {}x{}, expected {}x{}",
                        src,
                        frame.width(),
                        frame.height(),
                        w,
                        h
                    )));
                }
                Ok(frame)
            }
            Some(input) => match input.value_at(time) {
                Some(Value::Color(c)) => Ok(fill(w, h, &self.video, c)),
                _ => Ok(Frame::new(w, h, self.video.format)),
            },
            None => Ok(Frame::new(w, h, self.video.format)),
        }
    }

    fn eval_audio(&self, id: NodeId, range: TimeRange, sources: &dyn SourceProvider) -> Result<SampleBuffer, RenderError> {
        let node = self.node(id)?;
        let frames = self.audio.frames_for(range.length());
        let silence = || SampleBuffer::silent(self.audio, range.in_point(), frames);

        let input = |name: &str| -> Result<SampleBuffer, RenderError> {
            match node.input(name) {
                Some(Input::Connection(src)) => self.eval_audio(*src, range, sources),
                _ => Ok(silence()),
            }
        };

        match &node.kind {
            NodeKind::Footage { source } => sources.decoder(source)?.decode_audio(range, &self.audio),
            NodeKind::Solid => Ok(silence()),
            NodeKind::Blend => {
                let a = input(IN_A)?;
                let b = input(IN_B)?;
                let mix = self.param(node, IN_MIX, range.in_point(), 0.5).clamp(0.0, 1.0) as f32;
                let mut out = silence();
                for (i, s) in out.samples.iter_mut().enumerate() {
                    let sa = a.samples.get(i).copied().unwrap_or(0.0);
                    let sb = b.samples.get(i).copied().unwrap_or(0.0);
                    *s = sb + (sa - sb) * mix;
                }
                Ok(out)
            }
            NodeKind::Tone => {
                let gain = self.param(node, IN_GAIN, range.in_point(), 1.0) as f32;
                let mut out = input(IN_INPUT)?;
                out.samples.iter_mut().for_each(|s| *s *= gain);
                Ok(out)
            }
            NodeKind::ViewerOutput => input(IN_INPUT),
        }
    }
}

fn fill(w: usize, h: usize, video: &VideoParams, color: [f32; 4]) -> Frame {
    let mut frame = Frame::new(w, h, video.format);
    for y in 0..h {
        for x in 0..w {
            frame.set_pixel(x, y, color);
        }
    }
    frame
}

fn collect(
    graph: &NodeGraph,
    id: NodeId,
    visiting: &mut HashSet<NodeId>,
    out: &mut HashMap<NodeId, Node>,
) -> Result<(), RenderError> {
    if out.contains_key(&id) {
        return Ok(());
    }
    let node = graph
        .node(id)
        .ok_or_else(|| RenderError::Compile(format!("connection to missing node {}", id)))?;
    if !visiting.insert(id) {
        return Err(RenderError::Compile(format!("cycle through node '{}'", node.name)));
    }
    for src in node.connections() {
        collect(graph, src, visiting, out)?;
    }
    visiting.remove(&id);
    out.insert(id, node.clone());
    Ok(())
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::decoder::{DefaultDecoderFactory, DirectSources};

    fn solid_graph(color: [f32; 4]) -> (NodeGraph, NodeId) {
        let mut g = NodeGraph::new();
        let out = g.add_node("out", NodeKind::ViewerOutput);
        let solid = g.add_node("solid", NodeKind::Solid);
        g.set_value(solid, IN_COLOR, Value::Color(color));
        g.connect(out, IN_INPUT, solid);
        (g, solid)
    }

    fn small() -> VideoParams {
        VideoParams::new(4, 4, Rational::new(1, 24))
    }

    #[test]
    fn test_capture_is_a_deep_copy() {
        let (mut g, solid) = solid_graph([1.0, 0.0, 0.0, 1.0]);
        let snap = GraphSnapshot::capture(&g, small(), AudioParams::default()).unwrap();
        g.set_value(solid, IN_COLOR, Value::Color([0.0, 1.0, 0.0, 1.0]));

        let sources = DirectSources::new(DefaultDecoderFactory);
        let frame = snap.render_video(Rational::ZERO, &sources).unwrap();
        assert_eq!(frame.pixel(0, 0), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unreachable_nodes_are_skipped() {
        let (mut g, _) = solid_graph([1.0; 4]);
        g.add_node("orphan", NodeKind::Tone);
        let snap = GraphSnapshot::capture(&g, small(), AudioParams::default()).unwrap();
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_cycle_and_missing_are_compile_errors() {
        let mut g = NodeGraph::new();
        let out = g.add_node("out", NodeKind::ViewerOutput);
        let a = g.add_node("a", NodeKind::Tone);
        let b = g.add_node("b", NodeKind::Tone);
        g.connect(out, IN_INPUT, a);
        g.connect(a, IN_INPUT, b);
        g.connect(b, IN_INPUT, a);
        let err = GraphSnapshot::capture(&g, small(), AudioParams::default()).unwrap_err();
        assert!(matches!(err, RenderError::Compile(_)));

        g.remove_node(b);
        let err = GraphSnapshot::capture(&g, small(), AudioParams::default()).unwrap_err();
        assert!(matches!(err, RenderError::Compile(_)));

        let empty = NodeGraph::new();
        assert!(GraphSnapshot::capture(&empty, small(), AudioParams::default()).is_err());
    }

    #[test]
    fn test_identity_ignores_values_but_not_params() {
        let (mut g, solid) = solid_graph([1.0; 4]);
        let a = GraphSnapshot::capture(&g, small(), AudioParams::default()).unwrap();
        g.set_value(solid, IN_COLOR, Value::Color([0.5; 4]));
        let b = GraphSnapshot::capture(&g, small(), AudioParams::default()).unwrap();
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.frame_hash(Rational::ZERO), b.frame_hash(Rational::ZERO));

        let c = GraphSnapshot::capture(&g, VideoParams::new(8, 4, Rational::new(1, 24)), AudioParams::default())
            .unwrap();
        assert_ne!(b.identity(), c.identity());
    }

    #[test]
    fn test_static_graph_hashes_equal_across_time() {
        let (g, _) = solid_graph([1.0; 4]);
        let snap = GraphSnapshot::capture(&g, small(), AudioParams::default()).unwrap();
        assert_eq!(snap.frame_hash(Rational::ZERO), snap.frame_hash(Rational::from_int(3)));
        assert_eq!(snap.frame_hash(Rational::ZERO).len(), 64);
    }

    #[test]
    fn test_keyframes_interpolate_and_change_hash() {
        let (mut g, solid) = solid_graph([1.0; 4]);
        let out = g.output().unwrap();
        let tone = g.add_node("tone", NodeKind::Tone);
        g.connect(tone, IN_INPUT, solid);
        g.connect(out, IN_INPUT, tone);
        g.set_keyframes(
            tone,
            IN_GAIN,
            vec![
                Keyframe::new(Rational::ONE, Value::Float(0.0)),
                Keyframe::new(Rational::ZERO, Value::Float(1.0)),
            ],
        );
        let input = g.node(tone).unwrap().input(IN_GAIN).unwrap();
        assert_eq!(input.value_at(Rational::new(1, 2)), Some(Value::Float(0.5)));
        assert_eq!(input.value_at(Rational::from_int(5)), Some(Value::Float(0.0)));

        let snap = GraphSnapshot::capture(&g, small(), AudioParams::default()).unwrap();
        assert_ne!(snap.frame_hash(Rational::ZERO), snap.frame_hash(Rational::new(1, 2)));
        let sources = DirectSources::new(DefaultDecoderFactory);
        let frame = snap.render_video(Rational::new(1, 2), &sources).unwrap();
        assert!((frame.pixel(0, 0)[0] - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_value_resync_requires_same_structure() {
        let (mut g, solid) = solid_graph([1.0; 4]);
        let snap = GraphSnapshot::capture(&g, small(), AudioParams::default()).unwrap();
        g.set_value(solid, IN_COLOR, Value::Color([0.0; 4]));
        let resynced = snap.with_values_from(&g).unwrap();
        assert_eq!(resynced.identity(), snap.identity());
        assert_eq!(resynced.value_revision(), g.value_revision());

        g.add_node("extra", NodeKind::Solid);
        assert!(snap.with_values_from(&g).is_none());
    }
}
