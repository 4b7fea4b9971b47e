//! Markdown plan parsing.
//!
//! A plan is a root document with a phase overview table plus one sibling
//! document per phase containing task blocks. Parsing is deliberately
//! forgiving: a document missing the expected markers yields zero tasks
//! instead of an error, so a malformed plan degrades to "no work".

use crate::core::task::{Phase, SwarmTask, SwarmTaskId, TaskState, WorkerRole};
use crate::{hlog_warn, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

// Task block heading patterns, tried in priority order. The first pattern
// with any match in a document wins for that whole document.
static RE_TASK_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^#{1,6}\s*Task\s+(\d+)\.(\d+)\s*:\s*(.+)$").unwrap()
});
static RE_BARE_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^#{1,6}\s*(\d+)\.(\d+)\s*:\s*(.+)$").unwrap()
});
static RE_STEP_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^#{1,6}\s*Step\s+(\d+)\.(\d+)\s*:\s*(.+)$").unwrap()
});
static RE_CHECKLIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^-\s*\[ \]\s*(\d+)\.(\d+)\s*:\s*(.+)$").unwrap()
});

static RE_AGENT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@agent:\s*([\w-]+)").unwrap());
static RE_PRIORITY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@priority:\s*(\d+)").unwrap());
static RE_DEPENDS_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@depends:\s*([^\n]+)").unwrap());
static RE_DONE_WHEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@done_when:\s*([^\n]+)").unwrap());

static RE_GOAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*Goal:\*\*\s*([^\n]+)").unwrap());
// Inline path-looking tokens: at least one separator and a file extension.
static RE_PATH_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.-]+(?:/[\w.-]+)+\.\w+").unwrap());
static RE_PHASE_DOC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^phase-(\d+)\.md$").unwrap());

const MAX_REQUIREMENTS: usize = 5;

/// Raw plan text before parsing: the overview document plus one document
/// per phase, tagged with the phase number.
#[derive(Debug, Clone, Default)]
pub struct PlanSource {
    pub overview: String,
    pub phase_docs: Vec<(u32, String)>,
}

impl PlanSource {
    /// Load `plan.md` and every `phase-N.md` sibling from a directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let overview = fs::read_to_string(dir.join("plan.md")).unwrap_or_default();
        let mut phase_docs = Vec::new();
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Some(caps) = RE_PHASE_DOC.captures(name) {
                    if let Ok(number) = caps[1].parse::<u32>() {
                        let text = fs::read_to_string(entry.path())?;
                        phase_docs.push((number, text));
                    }
                }
            }
        }
        phase_docs.sort_by_key(|(n, _)| *n);
        Ok(Self {
            overview,
            phase_docs,
        })
    }
}

/// Parse an entire plan into ordered phases. Phases from the overview table
/// come first; a phase document without a table row still gets a phase.
pub fn parse_plan(source: &PlanSource) -> Vec<Phase> {
    let mut phases = parse_overview(&source.overview);

    for (number, doc) in &source.phase_docs {
        let tasks = parse_phase_doc(*number, doc);
        match phases.iter_mut().find(|p| p.number == *number) {
            Some(phase) => phase.tasks = tasks,
            None => {
                let mut phase = Phase::new(*number, &format!("Phase {}", number));
                phase.tasks = tasks;
                phases.push(phase);
            }
        }
    }

    phases.sort_by_key(|p| p.number);
    phases
}

/// Parse the overview table: `| number | title | status | steps |` rows.
/// Rows that do not parse are skipped.
fn parse_overview(overview: &str) -> Vec<Phase> {
    let mut phases = Vec::new();
    for line in overview.lines() {
        let line = line.trim();
        if !line.starts_with('|') {
            continue;
        }
        let cells: Vec<&str> = line
            .trim_matches('|')
            .split('|')
            .map(str::trim)
            .collect();
        if cells.len() < 3 {
            continue;
        }
        let Ok(number) = cells[0].parse::<u32>() else {
            // Header or separator row.
            continue;
        };
        let mut phase = Phase::new(number, cells[1]);
        phase.declared_complete = is_complete_status(cells[2]);
        phases.push(phase);
    }
    phases
}

/// Lenient phase status: several spellings of "finished" all count.
fn is_complete_status(status: &str) -> bool {
    let s = status.trim().to_lowercase();
    s == "complete"
        || s == "completed"
        || s == "done"
        || s.contains('\u{2705}')
        || s.contains('\u{2713}')
}

/// Split a phase document into task blocks and parse each one. The first
/// heading pattern with any match wins for the whole document.
fn parse_phase_doc(phase_number: u32, doc: &str) -> Vec<SwarmTask> {
    let patterns: [&Regex; 4] = [
        &RE_TASK_HEADING,
        &RE_BARE_HEADING,
        &RE_STEP_HEADING,
        &RE_CHECKLIST,
    ];
    let Some(regex) = patterns.iter().find(|re| re.is_match(doc)) else {
        return Vec::new();
    };

    let matches: Vec<(usize, u32, u32, String)> = regex
        .captures_iter(doc)
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let phase: u32 = caps[1].parse().ok()?;
            let ordinal: u32 = caps[2].parse().ok()?;
            Some((start, phase, ordinal, caps[3].trim().to_string()))
        })
        .collect();

    let mut tasks = Vec::new();
    for (i, (start, phase, ordinal, title)) in matches.iter().enumerate() {
        if *phase != phase_number {
            hlog_warn!(
                "task {}.{} found in phase {} document, skipping",
                phase,
                ordinal,
                phase_number
            );
            continue;
        }
        let end = matches
            .get(i + 1)
            .map(|(s, _, _, _)| *s)
            .unwrap_or(doc.len());
        let block = &doc[*start..end];
        tasks.push(parse_task_block(
            SwarmTaskId::new(*phase, *ordinal),
            title,
            block,
        ));
    }
    tasks
}

fn parse_task_block(id: SwarmTaskId, title: &str, block: &str) -> SwarmTask {
    let priority = RE_PRIORITY_TAG
        .captures(block)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(2);

    let depends = RE_DEPENDS_TAG
        .captures(block)
        .map(|c| parse_depends(&c[1]))
        .unwrap_or_default();

    let done_when = RE_DONE_WHEN_TAG
        .captures(block)
        .map(|c| c[1].trim().to_string());

    let goal = RE_GOAL
        .captures(block)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();

    let requirements = parse_requirements(block);
    let files = parse_files(block);

    let role = RE_AGENT_TAG
        .captures(block)
        .and_then(|c| WorkerRole::from_tag(&c[1]))
        .unwrap_or_else(|| infer_role(title, &goal, &requirements));

    let mut task = SwarmTask {
        id,
        title: title.to_string(),
        state: TaskState::Pending,
        role,
        assigned_to: None,
        priority,
        depends,
        goal,
        files,
        requirements,
        done_when,
        payload: String::new(),
        assigned_at: None,
        completed_at: None,
    };
    task.payload = render_payload(&task);
    task
}

/// `@depends:` is a comma-separated id list, or the literal "none".
fn parse_depends(value: &str) -> Vec<SwarmTaskId> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    value
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

/// Requirement lines from `**Requirements:**`, falling back to
/// `**Implementation Steps:**`, capped at five items.
fn parse_requirements(block: &str) -> Vec<String> {
    list_after_label(block, "**Requirements:**", MAX_REQUIREMENTS)
        .or_else(|| list_after_label(block, "**Implementation Steps:**", MAX_REQUIREMENTS))
        .unwrap_or_default()
}

/// Declared files: a `**Files:**` list if present, otherwise every inline
/// path-looking token in the block.
fn parse_files(block: &str) -> Vec<PathBuf> {
    if let Some(items) = list_after_label(block, "**Files:**", usize::MAX) {
        return items.iter().map(PathBuf::from).collect();
    }
    let mut seen = HashSet::new();
    RE_PATH_TOKEN
        .find_iter(block)
        .map(|m| PathBuf::from(m.as_str()))
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Collect `- item` lines immediately following a bold label, stopping at
/// the first non-list line.
fn list_after_label(block: &str, label: &str, limit: usize) -> Option<Vec<String>> {
    let start = block.find(label)?;
    let rest = &block[start + label.len()..];
    let mut items = Vec::new();
    for line in rest.lines().skip(1) {
        let trimmed = line.trim();
        if let Some(item) = trimmed.strip_prefix("- ") {
            items.push(item.trim().to_string());
            if items.len() == limit {
                break;
            }
        } else if trimmed.is_empty() && items.is_empty() {
            continue;
        } else {
            break;
        }
    }
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Keyword-based role inference when no `@agent:` tag is present.
fn infer_role(title: &str, goal: &str, requirements: &[String]) -> WorkerRole {
    let mut text = format!("{} {} ", title, goal).to_lowercase();
    for req in requirements {
        text.push_str(&req.to_lowercase());
        text.push(' ');
    }

    const FRONTEND: [&str; 6] = ["ui", "css", "html", "component", "layout", "markup"];
    const QA: [&str; 4] = ["test", "coverage", "verify", "regression"];
    const OPS: [&str; 5] = ["deploy", "docker", "ci", "pipeline", "infra"];
    const WRITER: [&str; 4] = ["document", "readme", "guide", "changelog"];

    let has = |words: &[&str]| {
        words
            .iter()
            .any(|w| text.split(|c: char| !c.is_alphanumeric()).any(|t| t == *w))
    };

    if has(&FRONTEND) {
        WorkerRole::Frontend
    } else if has(&QA) {
        WorkerRole::Qa
    } else if has(&OPS) {
        WorkerRole::Ops
    } else if has(&WRITER) {
        WorkerRole::Writer
    } else {
        WorkerRole::Backend
    }
}

/// Render the dispatch payload. Pure: the same task always renders the
/// same text, so rendering happens once at parse time.
pub fn render_payload(task: &SwarmTask) -> String {
    let mut out = format!("Task {}: {}\n", task.id, task.title);
    if !task.goal.is_empty() {
        out.push_str(&format!("\nGoal: {}\n", task.goal));
    }
    if !task.files.is_empty() {
        out.push_str("\nFiles:\n");
        for file in &task.files {
            out.push_str(&format!("- {}\n", file.display()));
        }
    }
    if !task.requirements.is_empty() {
        out.push_str("\nRequirements:\n");
        for req in &task.requirements {
            out.push_str(&format!("- {}\n", req));
        }
    }
    if let Some(done_when) = &task.done_when {
        out.push_str(&format!("\nDone when: {}\n", done_when));
    }
    out
}
