//! Shared signal graph: fixed topology, wired once at engine start.
//!
//! `voices → channel (gain/pan) → distortion → lowpass filter → reverb →
//! delay → limiter → master gain → output`. Parameters are live-updatable
//! through [`GraphParam`]; topology is not.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;

use crate::nodes::{
    AudioNode, ChannelNode, DelayNode, DistortionNode, FilterNode, GraphParam, LimiterNode,
    MasterGainNode, ReverbNode,
};

pub struct SignalGraph {
    graph: DiGraph<Box<dyn AudioNode>, ()>,
    channel: NodeIndex,
    distortion: NodeIndex,
    filter: NodeIndex,
    reverb: NodeIndex,
    delay: NodeIndex,
    master: NodeIndex,
    sample_rate: f32,
}

impl SignalGraph {
    /// Wire the full chain. Allocates every stage's state (including the
    /// reverb decay tail), so the engine runs this off the audio thread
    /// and installs the result at a block boundary.
    pub fn build(sample_rate: f32) -> Self {
        let mut graph: DiGraph<Box<dyn AudioNode>, ()> = DiGraph::new();

        let channel = graph.add_node(Box::new(ChannelNode::new(sample_rate)));
        let distortion = graph.add_node(Box::new(DistortionNode::new(sample_rate)));
        let filter = graph.add_node(Box::new(FilterNode::new(sample_rate, 8_000.0, 0.707)));
        let reverb = graph.add_node(Box::new(ReverbNode::new(sample_rate)));
        let delay = graph.add_node(Box::new(DelayNode::new(sample_rate)));
        let limiter = graph.add_node(Box::new(LimiterNode::new()));
        let master = graph.add_node(Box::new(MasterGainNode::new(sample_rate)));

        graph.add_edge(channel, distortion, ());
        graph.add_edge(distortion, filter, ());
        graph.add_edge(filter, reverb, ());
        graph.add_edge(reverb, delay, ());
        graph.add_edge(delay, limiter, ());
        graph.add_edge(limiter, master, ());

        Self {
            graph,
            channel,
            distortion,
            filter,
            reverb,
            delay,
            master,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Process one block of interleaved stereo in place, stages in
    /// topological order.
    pub fn process(&mut self, buffer: &mut [f32]) {
        let mut topo = Topo::new(&self.graph);
        while let Some(node_idx) = topo.next(&self.graph) {
            if let Some(node) = self.graph.node_weight_mut(node_idx) {
                node.process(buffer);
            }
        }
    }

    /// Route a parameter change to the stage that owns it.
    pub fn set_param(&mut self, param: GraphParam, value: f32) {
        let idx = match param {
            GraphParam::ChannelGain | GraphParam::ChannelPan => self.channel,
            GraphParam::DistortionAmount => self.distortion,
            GraphParam::FilterCutoffHz | GraphParam::FilterResonanceQ => self.filter,
            GraphParam::ReverbDecay | GraphParam::ReverbWet => self.reverb,
            GraphParam::DelayTimeSeconds | GraphParam::DelayFeedback | GraphParam::DelayWet => {
                self.delay
            }
            GraphParam::MasterGainDb => self.master,
        };
        if let Some(node) = self.graph.node_weight_mut(idx) {
            node.set_param(param, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_passes_signal() {
        let mut graph = SignalGraph::build(44_100.0);
        let mut buf: Vec<f32> = (0..1024)
            .flat_map(|i| {
                let s = (i as f32 * 0.05).sin() * 0.5;
                [s, s]
            })
            .collect();
        graph.process(&mut buf);
        assert!(buf.iter().any(|&s| s != 0.0), "signal should survive the chain");
        assert!(buf.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn limiter_keeps_output_bounded() {
        let mut graph = SignalGraph::build(44_100.0);
        // Slam the chain with a hot bus, as if 64 voices hit one step.
        for _ in 0..20 {
            let mut buf = vec![8.0; 512 * 2];
            graph.process(&mut buf);
            for &s in &buf {
                assert!(s.abs() <= 1.0, "output clipped past the ceiling: {s}");
            }
        }
    }

    #[test]
    fn params_route_without_panicking() {
        let mut graph = SignalGraph::build(48_000.0);
        for (param, value) in [
            (GraphParam::ChannelGain, 0.8),
            (GraphParam::ChannelPan, -0.5),
            (GraphParam::DistortionAmount, 0.4),
            (GraphParam::FilterCutoffHz, 2_000.0),
            (GraphParam::FilterResonanceQ, 2.0),
            (GraphParam::ReverbDecay, 0.7),
            (GraphParam::ReverbWet, 0.5),
            (GraphParam::DelayTimeSeconds, 0.3),
            (GraphParam::DelayFeedback, 0.4),
            (GraphParam::DelayWet, 0.25),
            (GraphParam::MasterGainDb, -3.0),
        ] {
            graph.set_param(param, value);
        }
        let mut buf = vec![0.25; 256 * 2];
        graph.process(&mut buf);
        assert!(buf.iter().all(|s| s.is_finite()));
    }

}
