//! Workflow graph helpers and seed randomization.
//!
//! A workflow is the JSON graph ComfyUI consumes: a map of node id to
//! `{"class_type": ..., "inputs": {...}}`.  The worker never interprets
//! the graph beyond locating seed inputs and save nodes; everything else
//! passes through untouched.

use rand::Rng;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Input keys treated as seed parameters.
///
/// Covers the stock samplers (`seed`), the advanced/custom samplers
/// (`noise_seed`), and a handful of custom nodes (`rand_seed`).
pub const SEED_FIELD_NAMES: &[&str] = &["seed", "noise_seed", "rand_seed"];

/// Node class that writes images to the output directory.
const SAVE_IMAGE_CLASS: &str = "SaveImage";

// ---------------------------------------------------------------------------
// Seed randomization
// ---------------------------------------------------------------------------

/// Replace every recognized seed input with a fresh random value.
///
/// Only non-negative JSON integers are replaced; node-link arrays like
/// `["3", 0]` and any other value shapes are left untouched, as is the
/// rest of the graph.  Each new seed is drawn uniformly from the full
/// `u64` range (ComfyUI's seed widget domain) and is guaranteed to
/// differ from the value it replaces.
///
/// Returns the mutated graph and the number of seeds replaced.
pub fn randomize_seeds(workflow: &serde_json::Value) -> (serde_json::Value, usize) {
    let mut result = workflow.clone();
    let mut replaced = 0;

    if let Some(nodes) = result.as_object_mut() {
        let mut rng = rand::rng();

        for node in nodes.values_mut() {
            let Some(inputs) = node.get_mut("inputs").and_then(|v| v.as_object_mut()) else {
                continue;
            };

            for &field in SEED_FIELD_NAMES {
                let Some(value) = inputs.get_mut(field) else {
                    continue;
                };
                let Some(old) = value.as_u64() else {
                    continue;
                };

                let mut fresh: u64 = rng.random();
                while fresh == old {
                    fresh = rng.random();
                }

                *value = serde_json::Value::from(fresh);
                replaced += 1;
            }
        }
    }

    (result, replaced)
}

// ---------------------------------------------------------------------------
// Graph inspection
// ---------------------------------------------------------------------------

/// Number of nodes in the workflow graph.
pub fn node_count(workflow: &serde_json::Value) -> usize {
    workflow.as_object().map_or(0, |nodes| nodes.len())
}

/// IDs of the nodes that save images to disk.
pub fn save_node_ids(workflow: &serde_json::Value) -> Vec<String> {
    let Some(nodes) = workflow.as_object() else {
        return Vec::new();
    };

    nodes
        .iter()
        .filter(|(_, node)| {
            node.get("class_type").and_then(|c| c.as_str()) == Some(SAVE_IMAGE_CLASS)
        })
        .map(|(id, _)| id.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_workflow() -> serde_json::Value {
        json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 42,
                    "steps": 20,
                    "model": ["4", 0]
                }
            },
            "7": {
                "class_type": "SamplerCustom",
                "inputs": {
                    "noise_seed": 123456789u64,
                    "cfg": 7.5
                }
            },
            "9": {
                "class_type": "SaveImage",
                "inputs": {
                    "filename_prefix": "output",
                    "images": ["8", 0]
                }
            }
        })
    }

    #[test]
    fn replaces_every_recognized_seed() {
        let workflow = sample_workflow();
        let (mutated, replaced) = randomize_seeds(&workflow);

        assert_eq!(replaced, 2);
        assert_ne!(mutated["3"]["inputs"]["seed"], json!(42));
        assert_ne!(mutated["7"]["inputs"]["noise_seed"], json!(123456789u64));
    }

    #[test]
    fn new_seeds_are_valid_u64() {
        let (mutated, _) = randomize_seeds(&sample_workflow());
        assert!(mutated["3"]["inputs"]["seed"].as_u64().is_some());
        assert!(mutated["7"]["inputs"]["noise_seed"].as_u64().is_some());
    }

    #[test]
    fn leaves_structure_untouched() {
        let workflow = sample_workflow();
        let (mutated, _) = randomize_seeds(&workflow);

        assert_eq!(mutated["3"]["inputs"]["steps"], json!(20));
        assert_eq!(mutated["3"]["inputs"]["model"], json!(["4", 0]));
        assert_eq!(mutated["7"]["inputs"]["cfg"], json!(7.5));
        assert_eq!(mutated["9"], workflow["9"]);
        assert_eq!(node_count(&mutated), node_count(&workflow));
    }

    #[test]
    fn seed_named_links_are_not_replaced() {
        // A seed input wired to another node's output is a link array,
        // not a literal value.
        let workflow = json!({
            "5": {
                "class_type": "KSampler",
                "inputs": { "seed": ["12", 0] }
            }
        });
        let (mutated, replaced) = randomize_seeds(&workflow);

        assert_eq!(replaced, 0);
        assert_eq!(mutated, workflow);
    }

    #[test]
    fn negative_seed_is_not_replaced() {
        let workflow = json!({
            "5": {
                "class_type": "KSampler",
                "inputs": { "seed": -1 }
            }
        });
        let (mutated, replaced) = randomize_seeds(&workflow);

        assert_eq!(replaced, 0);
        assert_eq!(mutated["5"]["inputs"]["seed"], json!(-1));
    }

    #[test]
    fn non_object_workflow_is_returned_unchanged() {
        let workflow = json!(["not", "a", "graph"]);
        let (mutated, replaced) = randomize_seeds(&workflow);

        assert_eq!(replaced, 0);
        assert_eq!(mutated, workflow);
    }

    #[test]
    fn counts_nodes_and_finds_save_nodes() {
        let workflow = sample_workflow();
        assert_eq!(node_count(&workflow), 3);
        assert_eq!(save_node_ids(&workflow), vec!["9".to_string()]);
    }

    #[test]
    fn empty_graph_has_no_save_nodes() {
        let workflow = json!({});
        assert_eq!(node_count(&workflow), 0);
        assert!(save_node_ids(&workflow).is_empty());
    }
}
