//! Stage dependency graph checks and ordering.

use shipit_core::pipeline::Stage;
use std::collections::HashMap;

/// Check that every `needs` edge names a known stage and that there are no cycles,
/// then return the stages in dependency order.
pub fn execution_order(stages: &[Stage]) -> Result<Vec<String>, String> {
    for stage in stages {
        for dep in &stage.needs {
            if !stages.iter().any(|s| &s.name == dep) {
                return Err(format!(
                    "stage '{}' needs unknown stage '{}'",
                    stage.name, dep
                ));
            }
        }
    }
    detect_cycle(stages)?;
    Ok(topological_sort(stages))
}

fn topological_sort(stages: &[Stage]) -> Vec<String> {
    let mut result = Vec::new();
    let mut visited = HashMap::new();
    let stage_map: HashMap<&str, &Stage> = stages.iter().map(|s| (s.name.as_str(), s)).collect();

    for stage in stages {
        topo_visit(&stage.name, &stage_map, &mut visited, &mut result);
    }
    result
}

fn topo_visit(
    name: &str,
    stage_map: &HashMap<&str, &Stage>,
    visited: &mut HashMap<String, bool>,
    result: &mut Vec<String>,
) {
    if visited.get(name).copied().unwrap_or(false) {
        return;
    }
    visited.insert(name.to_string(), true);

    if let Some(stage) = stage_map.get(name) {
        for dep in &stage.needs {
            topo_visit(dep, stage_map, visited, result);
        }
    }
    result.push(name.to_string());
}

fn detect_cycle(stages: &[Stage]) -> Result<(), String> {
    let mut visited = HashMap::new();
    let mut rec_stack = HashMap::new();
    let stage_map: HashMap<&str, &Stage> = stages.iter().map(|s| (s.name.as_str(), s)).collect();

    for stage in stages {
        if !visited.contains_key(stage.name.as_str()) {
            if let Some(cycle) =
                dfs_detect_cycle(&stage.name, &stage_map, &mut visited, &mut rec_stack)
            {
                return Err(format!("dependency cycle: {}", cycle));
            }
        }
    }
    Ok(())
}

fn dfs_detect_cycle<'a>(
    node: &'a str,
    stage_map: &'a HashMap<&'a str, &'a Stage>,
    visited: &mut HashMap<&'a str, bool>,
    rec_stack: &mut HashMap<&'a str, bool>,
) -> Option<String> {
    visited.insert(node, true);
    rec_stack.insert(node, true);

    if let Some(stage) = stage_map.get(node) {
        for dep in &stage.needs {
            let dep_str: &'a str = dep.as_str();
            if !visited.contains_key(dep_str) {
                if let Some(cycle) = dfs_detect_cycle(dep_str, stage_map, visited, rec_stack) {
                    return Some(cycle);
                }
            } else if rec_stack.get(dep_str).copied().unwrap_or(false) {
                return Some(format!("{} -> {}", node, dep));
            }
        }
    }

    rec_stack.insert(node, false);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipit_core::pipeline::{Pipeline, StageKind, TriggerEvent};

    fn stage(name: &str, needs: &[&str]) -> Stage {
        Stage {
            name: name.to_string(),
            needs: needs.iter().map(|n| n.to_string()).collect(),
            kind: StageKind::Validate,
        }
    }

    #[test]
    fn test_order_respects_needs() {
        let stages = vec![
            stage("publish", &["version"]),
            stage("validate", &[]),
            stage("version", &["validate"]),
        ];
        let order = execution_order(&stages).unwrap();
        assert_eq!(order, vec!["validate", "version", "publish"]);
    }

    #[test]
    fn test_release_chain_order() {
        let pipeline = Pipeline::for_event(
            "opsops",
            TriggerEvent::Push {
                branch: "main".to_string(),
            },
            "main",
        );
        let order = execution_order(&pipeline.stages).unwrap();
        assert_eq!(
            order,
            vec!["validate", "build", "aggregate", "version", "publish", "propagate"]
        );
    }

    #[test]
    fn test_cycle_rejected() {
        let stages = vec![stage("a", &["b"]), stage("b", &["a"])];
        let err = execution_order(&stages).unwrap_err();
        assert!(err.contains("cycle"), "{}", err);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let stages = vec![stage("build", &["lint"])];
        let err = execution_order(&stages).unwrap_err();
        assert!(err.contains("unknown stage 'lint'"));
    }
}
