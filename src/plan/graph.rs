//! 计划依赖图
//!
//! 使用邻接表和入度表做结构校验（Kahn 拓扑排序找环），并基于步骤状态计算就绪集合与阻塞集合。

use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::AgentError;
use crate::plan::types::*;

/// 计划依赖图
pub struct PlanGraph {
    /// 邻接表：步骤 ID -> 依赖该步骤的步骤列表
    pub adjacency: HashMap<StepId, Vec<StepId>>,
    /// 入度表：步骤 ID -> 依赖数（去重后）
    pub in_degree: HashMap<StepId, usize>,
    /// 声明顺序
    order: Vec<StepId>,
}

impl PlanGraph {
    /// 构建依赖图并校验：重复 id、悬空依赖、自依赖、环
    pub fn build(plan: &ExecutionPlan) -> Result<Self, AgentError> {
        let mut adjacency: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut in_degree: HashMap<StepId, usize> = HashMap::new();
        let mut order = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            if in_degree.insert(step.id.clone(), 0).is_some() {
                return Err(AgentError::InvalidPlan(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            adjacency.insert(step.id.clone(), Vec::new());
            order.push(step.id.clone());
        }

        for step in &plan.steps {
            let deps: HashSet<&StepId> = step.dependencies.iter().collect();
            for dep in deps {
                if dep == &step.id {
                    return Err(AgentError::InvalidPlan(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                let Some(dependents) = adjacency.get_mut(dep) else {
                    return Err(AgentError::InvalidPlan(format!(
                        "step '{}' depends on non-existent step '{}'",
                        step.id, dep
                    )));
                };
                dependents.push(step.id.clone());
                *in_degree.entry(step.id.clone()).or_insert(0) += 1;
            }
        }

        let graph = Self {
            adjacency,
            in_degree,
            order,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// 拓扑序（同层按声明顺序）
    pub fn topological_order(&self) -> Result<Vec<StepId>, AgentError> {
        let mut remaining = self.in_degree.clone();
        let mut queue: VecDeque<StepId> = self
            .order
            .iter()
            .filter(|id| remaining.get(*id) == Some(&0))
            .cloned()
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(id) = queue.pop_front() {
            if let Some(children) = self.adjacency.get(&id) {
                for child in children {
                    if let Some(deg) = remaining.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(child.clone());
                        }
                    }
                }
            }
            sorted.push(id);
        }

        if sorted.len() != self.order.len() {
            let cyclic: Vec<&str> = self
                .order
                .iter()
                .filter(|id| !sorted.contains(id))
                .map(|s| s.as_str())
                .collect();
            return Err(AgentError::InvalidPlan(format!(
                "dependency cycle among steps: {}",
                cyclic.join(", ")
            )));
        }
        Ok(sorted)
    }

    fn check_acyclic(&self) -> Result<(), AgentError> {
        self.topological_order().map(|_| ())
    }

    /// 就绪集合：Pending 且所有依赖已成功，按声明顺序
    pub fn ready_steps(&self, plan: &ExecutionPlan) -> Vec<StepId> {
        let succeeded: HashSet<&str> = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .map(|s| s.id.as_str())
            .collect();
        plan.steps
            .iter()
            .filter(|s| {
                s.status == StepStatus::Pending
                    && s.dependencies.iter().all(|d| succeeded.contains(d.as_str()))
            })
            .map(|s| s.id.clone())
            .collect()
    }

    /// 阻塞集合：仍为 Pending，但某条依赖链上已有失败/跳过的步骤，永远不会就绪
    pub fn blocked_steps(&self, plan: &ExecutionPlan) -> Vec<StepId> {
        let mut blocked: HashSet<StepId> = HashSet::new();
        let mut queue: VecDeque<StepId> = plan
            .steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed | StepStatus::Skipped))
            .map(|s| s.id.clone())
            .collect();

        while let Some(id) = queue.pop_front() {
            if let Some(children) = self.adjacency.get(&id) {
                for child in children {
                    let pending = plan
                        .get_step(child)
                        .map(|s| s.status == StepStatus::Pending)
                        .unwrap_or(false);
                    if pending && blocked.insert(child.clone()) {
                        queue.push_back(child.clone());
                    }
                }
            }
        }

        self.order
            .iter()
            .filter(|id| blocked.contains(*id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(steps: Vec<PlanStep>) -> ExecutionPlan {
        let mut p = ExecutionPlan::new("goal", "test");
        p.steps = steps;
        p
    }

    fn step(id: &str) -> PlanStep {
        PlanStep::new(id, "echo", json!({"text": id}))
    }

    #[test]
    fn test_graph_construction_sequential() {
        let p = plan(vec![step("a"), step("b").depends_on("a")]);
        let graph = PlanGraph::build(&p).unwrap();
        assert_eq!(graph.in_degree.get("a"), Some(&0));
        assert_eq!(graph.in_degree.get("b"), Some(&1));
        assert_eq!(graph.adjacency.get("a"), Some(&vec!["b".to_string()]));
    }

    #[test]
    fn test_duplicate_dependency_counted_once() {
        let p = plan(vec![step("a"), step("b").depends_on("a").depends_on("a")]);
        let graph = PlanGraph::build(&p).unwrap();
        assert_eq!(graph.in_degree.get("b"), Some(&1));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = PlanGraph::build(&plan(vec![step("a"), step("a")])).err().unwrap();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_dangling_dependency() {
        let err = PlanGraph::build(&plan(vec![step("a").depends_on("ghost")]))
            .err()
            .unwrap();
        assert!(err.to_string().contains("non-existent"));
    }

    #[test]
    fn test_rejects_cycle() {
        let p = plan(vec![
            step("a").depends_on("c"),
            step("b").depends_on("a"),
            step("c").depends_on("b"),
        ]);
        let err = PlanGraph::build(&p).err().unwrap();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_topological_order_respects_declaration() {
        let p = plan(vec![
            step("c"),
            step("a"),
            step("b").depends_on("a").depends_on("c"),
        ]);
        let graph = PlanGraph::build(&p).unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_ready_steps() {
        let mut p = plan(vec![step("a"), step("b").depends_on("a"), step("c")]);
        let graph = PlanGraph::build(&p).unwrap();
        assert_eq!(graph.ready_steps(&p), vec!["a", "c"]);

        p.steps[0].status = StepStatus::Succeeded;
        assert_eq!(graph.ready_steps(&p), vec!["b", "c"]);
    }

    #[test]
    fn test_blocked_steps_transitive() {
        let mut p = plan(vec![
            step("a"),
            step("b").depends_on("a"),
            step("c").depends_on("b"),
            step("d"),
        ]);
        let graph = PlanGraph::build(&p).unwrap();
        p.steps[0].status = StepStatus::Failed;
        assert_eq!(graph.blocked_steps(&p), vec!["b", "c"]);
        assert!(graph.ready_steps(&p).contains(&"d".to_string()));
    }
}
