//! Plan Validator
//!
//! Deterministic, side-effect-free structural checks run on every plan before
//! it is installed. Every violation is collected; nothing fails fast.
//!
//! Checks, in order:
//! 1. the plan has at least one step
//! 2. every step has an id, tool steps name a capability, ids are unique
//! 3. tool capabilities exist in the catalog (with suggestions when not)
//! 4. dependencies point at earlier steps, never later ones or self
//! 5. required capability parameters are present (warning only)
//! 6. the whole dependency graph is acyclic

use crate::conductor::types::{Plan, Step};
use sdk::types::CapabilitySpec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Names planners commonly invent, mapped to the real capabilities they most
/// likely meant. Only targets present in the catalog are ever suggested.
const COMMON_SUBSTITUTES: &[(&str, &[&str])] = &[
    ("list_files", &["organize_files", "list_dir"]),
    ("ls", &["list_dir"]),
    ("find_files", &["search_documents", "list_dir"]),
    ("move_file", &["organize_files"]),
    ("rename_file", &["organize_files"]),
    ("delete_file", &["organize_files"]),
    ("open_file", &["read_file"]),
    ("cat", &["read_file"]),
    ("read_document", &["read_file", "search_documents"]),
    ("save_file", &["write_file"]),
    ("create_file", &["write_file"]),
    ("search_web", &["search_documents"]),
    ("web_search", &["search_documents"]),
    ("google_search", &["search_documents"]),
    ("search_files", &["search_documents"]),
    ("send_email", &["reply"]),
    ("respond", &["reply"]),
];

/// Minimum length of a shared `_`-separated token for two names to be
/// considered similar.
const MIN_SHARED_TOKEN_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    EmptyPlan,
    MissingField,
    DuplicateStepId,
    HallucinatedCapability,
    ForwardDependency,
    MissingDependency,
    SelfDependency,
    MissingParameter,
    DependencyCycle,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FindingKind::EmptyPlan => "empty_plan",
            FindingKind::MissingField => "missing_field",
            FindingKind::DuplicateStepId => "duplicate_step_id",
            FindingKind::HallucinatedCapability => "hallucinated_capability",
            FindingKind::ForwardDependency => "forward_dependency",
            FindingKind::MissingDependency => "missing_dependency",
            FindingKind::SelfDependency => "self_dependency",
            FindingKind::MissingParameter => "missing_parameter",
            FindingKind::DependencyCycle => "dependency_cycle",
        };
        f.write_str(s)
    }
}

/// One violation found in a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl Finding {
    fn error(kind: FindingKind, step_id: Option<&str>, message: String) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            step_id: step_id.map(str::to_string),
            message,
            suggestions: Vec::new(),
        }
    }

    fn warning(kind: FindingKind, step_id: Option<&str>, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, step_id, message)
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "[{}] {}", severity, self.kind)?;
        if let Some(id) = &self.step_id {
            write!(f, " in step '{}'", id)?;
        }
        write!(f, ": {}", self.message)?;
        if !self.suggestions.is_empty() {
            write!(f, " (did you mean: {})", self.suggestions.join(", "))?;
        }
        Ok(())
    }
}

/// Outcome of validating one plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    fn from_findings(findings: Vec<Finding>) -> Self {
        Self {
            is_valid: !findings.iter().any(Finding::is_error),
            findings,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| !f.is_error())
    }
}

/// Validator bound to one capability catalog
pub struct PlanValidator<'a> {
    catalog: Vec<&'a str>,
    specs: HashMap<&'a str, &'a CapabilitySpec>,
}

impl<'a> PlanValidator<'a> {
    pub fn new(capabilities: &'a [CapabilitySpec]) -> Self {
        Self {
            catalog: capabilities.iter().map(|c| c.name.as_str()).collect(),
            specs: capabilities.iter().map(|c| (c.name.as_str(), c)).collect(),
        }
    }

    /// Validator knowing only capability names; parameter checks are skipped.
    pub fn from_names(names: &'a [String]) -> Self {
        Self {
            catalog: names.iter().map(String::as_str).collect(),
            specs: HashMap::new(),
        }
    }

    pub fn validate(&self, plan: &Plan) -> ValidationReport {
        if plan.is_empty() {
            return ValidationReport::from_findings(vec![Finding::error(
                FindingKind::EmptyPlan,
                None,
                "plan contains no steps".to_string(),
            )]);
        }

        let mut findings = Vec::new();
        self.check_fields(plan, &mut findings);
        self.check_capabilities(plan, &mut findings);
        check_dependencies(plan, &mut findings);
        self.check_parameters(plan, &mut findings);
        check_cycles(plan, &mut findings);

        ValidationReport::from_findings(findings)
    }

    fn check_fields(&self, plan: &Plan, findings: &mut Vec<Finding>) {
        let mut seen: HashSet<&str> = HashSet::new();
        for (index, step) in plan.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                findings.push(Finding::error(
                    FindingKind::MissingField,
                    None,
                    format!("step at position {} has no id", index + 1),
                ));
            } else if !seen.insert(step.id.as_str()) {
                findings.push(Finding::error(
                    FindingKind::DuplicateStepId,
                    Some(&step.id),
                    format!("step id '{}' is used more than once", step.id),
                ));
            }

            if step.kind.requires_capability() && capability_of(step).is_none() {
                findings.push(Finding::error(
                    FindingKind::MissingField,
                    step_ref(step),
                    "tool step does not name a capability".to_string(),
                ));
            }
        }
    }

    fn check_capabilities(&self, plan: &Plan, findings: &mut Vec<Finding>) {
        for step in &plan.steps {
            let Some(name) = capability_of(step) else {
                continue;
            };
            if self.catalog.contains(&name) {
                continue;
            }
            let mut finding = Finding::error(
                FindingKind::HallucinatedCapability,
                step_ref(step),
                format!("capability '{}' does not exist in the catalog", name),
            );
            finding.suggestions = suggest_alternatives(name, &self.catalog);
            findings.push(finding);
        }
    }

    fn check_parameters(&self, plan: &Plan, findings: &mut Vec<Finding>) {
        for step in &plan.steps {
            let Some(spec) = capability_of(step).and_then(|name| self.specs.get(name)) else {
                continue;
            };
            for param in spec.required_inputs() {
                if !step.inputs.contains_key(param) {
                    findings.push(Finding::warning(
                        FindingKind::MissingParameter,
                        step_ref(step),
                        format!("required parameter '{}' of '{}' is not set", param, spec.name),
                    ));
                }
            }
        }
    }
}

/// Validate `plan` against a catalog of capability names.
pub fn validate(plan: &Plan, capability_names: &[String]) -> ValidationReport {
    PlanValidator::from_names(capability_names).validate(plan)
}

fn capability_of(step: &Step) -> Option<&str> {
    step.capability
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

fn step_ref(step: &Step) -> Option<&str> {
    if step.id.trim().is_empty() {
        None
    } else {
        Some(step.id.as_str())
    }
}

fn check_dependencies(plan: &Plan, findings: &mut Vec<Finding>) {
    let mut first_position: HashMap<&str, usize> = HashMap::new();
    for (index, step) in plan.steps.iter().enumerate() {
        first_position.entry(step.id.as_str()).or_insert(index);
    }

    for (index, step) in plan.steps.iter().enumerate() {
        for dep in &step.depends_on {
            if *dep == step.id {
                findings.push(Finding::error(
                    FindingKind::SelfDependency,
                    step_ref(step),
                    "step depends on itself".to_string(),
                ));
                continue;
            }
            match first_position.get(dep.as_str()) {
                None => findings.push(Finding::error(
                    FindingKind::MissingDependency,
                    step_ref(step),
                    format!("dependency '{}' does not name any step", dep),
                )),
                Some(&position) if position > index => findings.push(Finding::error(
                    FindingKind::ForwardDependency,
                    step_ref(step),
                    format!("dependency '{}' is declared later in the plan", dep),
                )),
                Some(_) => {}
            }
        }
    }
}

/// Iterative depth-first search over id -> dependency edges.
///
/// `on_stack` is the recursion set; an edge into it closes a cycle, reported
/// with the full path. Self edges are left to `check_dependencies`.
fn check_cycles(plan: &Plan, findings: &mut Vec<Finding>) {
    let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in &plan.steps {
        graph
            .entry(step.id.as_str())
            .or_insert_with(|| step.depends_on.iter().map(String::as_str).collect());
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<Vec<&str>> = HashSet::new();

    for root in plan.steps.iter().map(|s| s.id.as_str()) {
        if visited.contains(root) {
            continue;
        }

        // (node, index of the next edge to explore)
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        let mut on_stack: HashSet<&str> = HashSet::from([root]);
        visited.insert(root);

        while let Some(frame) = stack.last_mut() {
            let (node, next_edge) = *frame;
            let edges = graph.get(node).map(Vec::as_slice).unwrap_or_default();

            let Some(&dep) = edges.get(next_edge) else {
                on_stack.remove(node);
                stack.pop();
                continue;
            };
            frame.1 += 1;

            if dep == node || !graph.contains_key(dep) {
                continue;
            }

            if on_stack.contains(dep) {
                let start = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                let mut path: Vec<&str> = stack[start..].iter().map(|(n, _)| *n).collect();

                let mut key = path.clone();
                key.sort_unstable();
                if reported.insert(key) {
                    path.push(dep);
                    findings.push(Finding::error(
                        FindingKind::DependencyCycle,
                        Some(dep),
                        format!("dependency cycle: {}", path.join(" -> ")),
                    ));
                }
            } else if visited.insert(dep) {
                on_stack.insert(dep);
                stack.push((dep, 0));
            }
        }
    }
}

/// Real capability names a planner most plausibly meant by `name`.
///
/// Substring and shared-token matches come first, in catalog order, followed by
/// entries from the substitutes table that exist in the catalog.
pub fn suggest_alternatives(name: &str, catalog: &[&str]) -> Vec<String> {
    let wanted = name.to_ascii_lowercase();
    let wanted_tokens: Vec<&str> = tokens(&wanted).collect();
    let mut suggestions: Vec<String> = Vec::new();

    for candidate in catalog {
        let lower = candidate.to_ascii_lowercase();
        let similar = lower.contains(&wanted)
            || wanted.contains(&lower)
            || tokens(&lower).any(|t| wanted_tokens.contains(&t));
        if similar && !suggestions.iter().any(|s| s == candidate) {
            suggestions.push(candidate.to_string());
        }
    }

    if let Some((_, targets)) = COMMON_SUBSTITUTES.iter().find(|(k, _)| *k == wanted) {
        for target in targets.iter() {
            if catalog.contains(target) && !suggestions.iter().any(|s| s == target) {
                suggestions.push(target.to_string());
            }
        }
    }

    suggestions
}

fn tokens(name: &str) -> impl Iterator<Item = &str> {
    name.split(['_', '-', '.'])
        .filter(|t| t.len() >= MIN_SHARED_TOKEN_LEN)
}
