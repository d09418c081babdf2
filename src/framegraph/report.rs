//! Debug views of a compiled graph: a serialisable report, a JSON canvas of
//! the pass timeline and heap layout, and a mermaid read/write diagram.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::{Value, json};

use super::{alias::ResourceOrigin, lifetime::Lifetime};

const PASS_WIDTH: i64 = 250;
const PASS_HEIGHT: i64 = 60;
const PASS_STRIDE: i64 = 300;
const ROW_STRIDE: i64 = 80;
const HEAP_WIDTH: f64 = 1200.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PassReport {
    pub name: String,
    pub declaration_index: usize,
    pub final_index: usize,
    pub distance: u32,
    /// Indices into [`GraphReport::resources`].
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub barrier_count: usize,
    pub clear_count: usize,
    pub discard_count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceReport {
    pub name: String,
    pub origin: ResourceOrigin,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub accesses: Vec<String>,
    pub lifetime: Option<Lifetime>,
    pub offset_bytes: u64,
    pub size_bytes: u64,
    pub needs_clear: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphReport {
    pub frames_in_flight: usize,
    pub frame_heap_size_bytes: u64,
    pub total_heap_size_bytes: u64,
    /// In execution order.
    pub passes: Vec<PassReport>,
    pub resources: Vec<ResourceReport>,
}

impl GraphReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// A JSON canvas with passes along the top, one lifetime bar per texture
    /// beneath them and the frame heap layout at the bottom.
    pub fn to_canvas(&self) -> Value {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();

        for pass in &self.passes {
            nodes.push(json!({
                "id": format!("pass{}", pass.final_index),
                "type": "text",
                "text": format!("{}\n#{} (distance {})", pass.name, pass.final_index, pass.distance),
                "x": pass.final_index as i64 * PASS_STRIDE,
                "y": 0,
                "width": PASS_WIDTH,
                "height": PASS_HEIGHT,
                "color": "4",
            }));
        }

        for (index, resource) in self.resources.iter().enumerate() {
            let Some(lifetime) = resource.lifetime else {
                continue;
            };
            let color = if resource.origin == ResourceOrigin::Import { "2" } else { "5" };
            nodes.push(json!({
                "id": format!("res{index}"),
                "type": "text",
                "text": format!("{} {}", resource.name, lifetime),
                "x": lifetime.start as i64 * PASS_STRIDE,
                "y": (index as i64 + 1) * ROW_STRIDE + PASS_HEIGHT,
                "width": (lifetime.end - lifetime.start) as i64 * PASS_STRIDE + PASS_WIDTH,
                "height": PASS_HEIGHT,
                "color": color,
            }));
        }

        for pass in &self.passes {
            for &input in &pass.inputs {
                edges.push(json!({
                    "id": format!("r{}p{}", input, pass.final_index),
                    "fromNode": format!("res{input}"),
                    "toNode": format!("pass{}", pass.final_index),
                    "label": "Read",
                }));
            }
            for &output in &pass.outputs {
                edges.push(json!({
                    "id": format!("p{}w{}", pass.final_index, output),
                    "fromNode": format!("pass{}", pass.final_index),
                    "toNode": format!("res{output}"),
                    "label": "Write",
                }));
            }
        }

        let heap_top = (self.resources.len() as i64 + 2) * ROW_STRIDE + PASS_HEIGHT;
        if self.frame_heap_size_bytes > 0 {
            let scale = HEAP_WIDTH / self.frame_heap_size_bytes as f64;
            nodes.push(json!({
                "id": "heap",
                "type": "text",
                "text": format!("frame heap {} bytes x {}", self.frame_heap_size_bytes, self.frames_in_flight),
                "x": 0,
                "y": heap_top,
                "width": HEAP_WIDTH as i64,
                "height": PASS_HEIGHT,
            }));
            let placed = self
                .resources
                .iter()
                .enumerate()
                .filter(|(_, resource)| resource.origin == ResourceOrigin::Graph);
            for (row, (index, resource)) in placed.enumerate() {
                nodes.push(json!({
                    "id": format!("heap{index}"),
                    "type": "text",
                    "text": format!("{} @{}", resource.name, resource.offset_bytes),
                    "x": (resource.offset_bytes as f64 * scale) as i64,
                    "y": heap_top + (row as i64 + 1) * ROW_STRIDE,
                    "width": ((resource.size_bytes as f64 * scale) as i64).max(20),
                    "height": PASS_HEIGHT,
                }));
            }
        }

        json!({ "nodes": nodes, "edges": edges })
    }

    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph LR\n");
        for pass in &self.passes {
            let p = format!("P{}[{}]", pass.final_index, pass.name);
            for &input in &pass.inputs {
                let _ = writeln!(out, "    R{}{{{}}} -->|Read| {}", input, self.resources[input].name, p);
            }
            for &output in &pass.outputs {
                let _ = writeln!(out, "    {} -->|Write| R{}{{{}}}", p, output, self.resources[output].name);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> GraphReport {
        GraphReport {
            frames_in_flight: 2,
            frame_heap_size_bytes: 65536,
            total_heap_size_bytes: 131072,
            passes: vec![
                PassReport {
                    name: "forward".to_owned(),
                    declaration_index: 0,
                    final_index: 0,
                    distance: 0,
                    inputs: vec![],
                    outputs: vec![0],
                    barrier_count: 1,
                    clear_count: 1,
                    discard_count: 0,
                },
                PassReport {
                    name: "present".to_owned(),
                    declaration_index: 1,
                    final_index: 1,
                    distance: 1,
                    inputs: vec![0],
                    outputs: vec![],
                    barrier_count: 1,
                    clear_count: 0,
                    discard_count: 0,
                },
            ],
            resources: vec![ResourceReport {
                name: "color".to_owned(),
                origin: ResourceOrigin::Graph,
                width: 256,
                height: 256,
                format: "R8G8B8A8_UNORM".to_owned(),
                accesses: vec!["RENDER_TARGET".to_owned(), "PRESENT".to_owned()],
                lifetime: Some(Lifetime { start: 0, end: 1 }),
                offset_bytes: 0,
                size_bytes: 65536,
                needs_clear: true,
            }],
        }
    }

    #[test]
    fn mermaid_lists_reads_and_writes() {
        let mermaid = report().to_mermaid();

        assert!(mermaid.starts_with("graph LR\n"));
        assert!(mermaid.contains("P0[forward] -->|Write| R0{color}"));
        assert!(mermaid.contains("R0{color} -->|Read| P1[present]"));
    }

    #[test]
    fn canvas_has_pass_resource_and_heap_nodes() {
        let canvas = report().to_canvas();
        let nodes = canvas["nodes"].as_array().unwrap();
        let edges = canvas["edges"].as_array().unwrap();

        // two passes, one lifetime bar, the heap and one placement
        assert_eq!(nodes.len(), 5);
        assert_eq!(edges.len(), 2);
        assert_eq!(nodes[2]["width"], json!(PASS_STRIDE + PASS_WIDTH));
    }

    #[test]
    fn json_uses_lowercase_origins() {
        let json = report().to_json().unwrap();

        assert!(json.contains("\"origin\": \"graph\""));
        assert!(json.contains("\"frame_heap_size_bytes\": 65536"));
    }
}
