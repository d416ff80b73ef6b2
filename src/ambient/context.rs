//! A small software audio context: an arena of nodes pulled block by block
//! into a single mono destination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::node::{Biquad, FilterType, Node, NodeId, NodeKind};
use super::param::AudioParam;

pub type SharedContext = Arc<Mutex<AudioContext>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Closed,
}

pub struct AudioContext {
    sample_rate: u32,
    frames_rendered: u64,
    state: ContextState,
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    destination: NodeId,
    // render order, recomputed when the topology changes
    order: Vec<NodeId>,
    dirty: bool,
}

impl AudioContext {
    pub fn new(sample_rate: u32) -> Self {
        let destination = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(destination, Node::new(NodeKind::Destination));
        Self {
            sample_rate,
            frames_rendered: 0,
            state: ContextState::Running,
            nodes,
            next_id: 1,
            destination,
            order: Vec::new(),
            dirty: true,
        }
    }

    pub fn shared(sample_rate: u32) -> SharedContext {
        Arc::new(Mutex::new(Self::new(sample_rate)))
    }

    /// Context time in seconds, advanced by rendering.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ContextState::Closed
    }

    /// Live nodes, not counting the destination.
    pub fn node_count(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Every live node except the destination.
    #[cfg(test)]
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .filter(|(id, _)| **id != self.destination)
            .map(|(id, node)| (*id, node))
    }

    /// Nodes currently feeding `id`.
    #[cfg(test)]
    pub fn inputs_of(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|n| n.inputs.as_slice())
            .unwrap_or(&[])
    }

    fn add(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(kind));
        self.dirty = true;
        id
    }

    pub fn create_gain(&mut self, value: f32) -> NodeId {
        self.add(NodeKind::Gain {
            gain: AudioParam::new(value),
        })
    }

    pub fn create_filter(&mut self, kind: FilterType, frequency: f32) -> NodeId {
        self.add(NodeKind::Filter(Biquad::new(kind, frequency)))
    }

    /// Looping buffer source; silent until [`start`](Self::start) is called.
    pub fn create_noise_source(&mut self, buffer: Arc<[f32]>) -> NodeId {
        self.add(NodeKind::Noise {
            buffer,
            position: 0,
            looping: true,
            start: None,
        })
    }

    pub fn create_oscillator(&mut self, frequency: f32) -> NodeId {
        self.add(NodeKind::Oscillator {
            frequency: AudioParam::new(frequency),
            phase: 0.0,
            start: None,
            stop: None,
        })
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        if !self.nodes.contains_key(&from) {
            return;
        }
        if let Some(target) = self.nodes.get_mut(&to) {
            if !target.inputs.contains(&from) {
                target.inputs.push(from);
                target.had_input = true;
                self.dirty = true;
            }
        }
    }

    /// Detach `id` from every node it feeds. Unknown or already
    /// disconnected nodes are ignored.
    pub fn disconnect(&mut self, id: NodeId) {
        for node in self.nodes.values_mut() {
            if let Some(pos) = node.inputs.iter().position(|i| *i == id) {
                node.inputs.remove(pos);
                self.dirty = true;
            }
        }
    }

    pub fn start(&mut self, id: NodeId, when: f64) {
        if let Some(node) = self.nodes.get_mut(&id) {
            match &mut node.kind {
                NodeKind::Noise { start, .. } | NodeKind::Oscillator { start, .. } => {
                    *start = Some(when);
                }
                _ => {}
            }
        }
    }

    /// Schedule an oscillator to stop; it is removed from the graph once the
    /// stop time has been rendered.
    pub fn stop(&mut self, id: NodeId, when: f64) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if let NodeKind::Oscillator { stop, .. } = &mut node.kind {
                *stop = Some(when);
            }
        }
    }

    /// Mark a node for removal once every input feeding it has finished.
    pub fn release_when_silent(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.release_when_silent = true;
        }
    }

    pub fn gain_param(&mut self, id: NodeId) -> Option<&mut AudioParam> {
        match &mut self.nodes.get_mut(&id)?.kind {
            NodeKind::Gain { gain } => Some(gain),
            _ => None,
        }
    }

    /// Cutoff of a filter or pitch of an oscillator.
    pub fn frequency_param(&mut self, id: NodeId) -> Option<&mut AudioParam> {
        match &mut self.nodes.get_mut(&id)?.kind {
            NodeKind::Filter(biquad) => Some(&mut biquad.frequency),
            NodeKind::Oscillator { frequency, .. } => Some(frequency),
            _ => None,
        }
    }

    /// Stop rendering and drop every node. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state = ContextState::Closed;
        self.nodes.retain(|id, _| *id == self.destination);
        if let Some(dest) = self.nodes.get_mut(&self.destination) {
            dest.inputs.clear();
        }
        self.order.clear();
        self.dirty = false;
    }

    fn rebuild_order(&mut self) {
        fn visit(
            id: NodeId,
            nodes: &HashMap<NodeId, Node>,
            seen: &mut Vec<NodeId>,
            order: &mut Vec<NodeId>,
        ) {
            if seen.contains(&id) {
                return;
            }
            seen.push(id);
            if let Some(node) = nodes.get(&id) {
                for input in &node.inputs {
                    visit(*input, nodes, seen, order);
                }
            }
            order.push(id);
        }

        let mut seen = Vec::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());
        visit(self.destination, &self.nodes, &mut seen, &mut order);
        self.order = order;
        self.dirty = false;
    }

    /// Render mono samples into `out`. A closed context renders silence and
    /// returns `false`.
    pub fn render(&mut self, out: &mut [f32]) -> bool {
        if self.is_closed() {
            out.fill(0.0);
            return false;
        }
        if self.dirty {
            self.rebuild_order();
        }

        let sample_rate = self.sample_rate as f32;
        for sample in out.iter_mut() {
            let t = self.current_time();
            for idx in 0..self.order.len() {
                let id = self.order[idx];
                let input: f32 = match self.nodes.get(&id) {
                    Some(node) => node
                        .inputs
                        .iter()
                        .filter_map(|i| self.nodes.get(i))
                        .map(|n| n.output)
                        .sum(),
                    None => continue,
                };
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.process(input, t, sample_rate);
                }
            }
            *sample = self
                .nodes
                .get(&self.destination)
                .map(|d| d.output)
                .unwrap_or(0.0);
            self.frames_rendered += 1;
        }

        let now = self.current_time();
        for node in self.nodes.values_mut() {
            node.prune(now);
        }
        self.reap_finished();
        true
    }

    /// Remove ended sources, then any node marked `release_when_silent`
    /// whose inputs are all gone.
    fn reap_finished(&mut self) {
        let ended: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.is_source() && n.ended)
            .map(|(id, _)| *id)
            .collect();
        if ended.is_empty() {
            return;
        }
        let mut removed = ended;
        while !removed.is_empty() {
            for id in &removed {
                self.nodes.remove(id);
                self.disconnect(*id);
            }
            removed = self
                .nodes
                .iter()
                .filter(|(id, n)| {
                    **id != self.destination
                        && n.release_when_silent
                        && n.had_input
                        && n.inputs.is_empty()
                })
                .map(|(id, _)| *id)
                .collect();
        }
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_chain_into_destination() {
        let mut ctx = AudioContext::new(8000);
        let buffer: Arc<[f32]> = Arc::from(vec![1.0f32; 16]);
        let src = ctx.create_noise_source(buffer);
        let gain = ctx.create_gain(0.5);
        ctx.connect(src, gain);
        ctx.connect(gain, ctx.destination());
        ctx.start(src, 0.0);

        let mut out = [0.0f32; 8];
        assert!(ctx.render(&mut out));
        assert!(out.iter().all(|s| (*s - 0.5).abs() < 1e-6));
        assert!((ctx.current_time() - 8.0 / 8000.0).abs() < 1e-9);
    }

    #[test]
    fn one_shot_voice_is_reaped_after_stop() {
        let mut ctx = AudioContext::new(8000);
        let master = ctx.create_gain(1.0);
        ctx.connect(master, ctx.destination());

        let osc = ctx.create_oscillator(440.0);
        let env = ctx.create_gain(0.1);
        ctx.connect(osc, env);
        ctx.connect(env, master);
        ctx.release_when_silent(env);
        ctx.start(osc, 0.0);
        ctx.stop(osc, 0.01);
        assert_eq!(ctx.node_count(), 3);

        let mut out = vec![0.0f32; 160];
        ctx.render(&mut out);
        assert!(!ctx.contains(osc));
        assert!(!ctx.contains(env));
        // master stays even though its inputs are gone
        assert!(ctx.contains(master));
        assert_eq!(ctx.node_count(), 1);
    }

    #[test]
    fn disconnect_tolerates_repeats_and_unknown_nodes() {
        let mut ctx = AudioContext::new(8000);
        let gain = ctx.create_gain(1.0);
        ctx.connect(gain, ctx.destination());
        ctx.disconnect(gain);
        ctx.disconnect(gain);
        ctx.disconnect(NodeId(999));
        assert!(ctx.inputs_of(ctx.destination()).is_empty());
    }

    #[test]
    fn close_is_idempotent_and_drops_nodes() {
        let mut ctx = AudioContext::new(8000);
        let gain = ctx.create_gain(1.0);
        ctx.connect(gain, ctx.destination());
        ctx.close();
        ctx.close();
        assert!(ctx.is_closed());
        assert_eq!(ctx.node_count(), 0);

        let mut out = [1.0f32; 4];
        assert!(!ctx.render(&mut out));
        assert_eq!(out, [0.0; 4]);
    }
}
