//! Skill catalog scanning and on-demand activation.
//!
//! A skill is a folder containing a markdown file with YAML front matter
//! (`name`, `description`, optionally `allowed-tools`) and, optionally, a
//! sibling YAML file declaring tool descriptors. At startup the harness scans
//! configured directories into a lightweight [`SkillCatalogEntry`] list; the
//! built-in `activate_skill` tool later promotes an entry into a full
//! [`ActivatedSkill`] and stores it on the current task's
//! [`TaskContext`](crate::task_context::TaskContext).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{A2AError, A2AResult};

/// Lightweight, always-resident description of a discovered skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillCatalogEntry {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
    pub has_tools: bool,
    pub allowed_tools: Vec<String>,
}

/// A tool descriptor resolved from a skill's sibling tool-declaration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// A tool made available to the agent once its owning skill is activated.
///
/// The public name is `{toolName}_{skillName}` and the description is
/// prefixed `Loaded by skill {skillName}: …`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivatedTool {
    pub public_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// The full, on-demand record produced by `activate_skill`, stored on
/// the task context's `activatedSkills` map, keyed by skill name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivatedSkill {
    pub name: String,
    pub body: String,
    pub tools: Vec<ActivatedTool>,
}

/// YAML front matter shape expected at the top of a skill's markdown file.
#[derive(Debug, Deserialize)]
struct FrontMatter {
    name: String,
    description: String,
    #[serde(default, rename = "allowed-tools")]
    allowed_tools: Option<AllowedTools>,
}

/// `allowed-tools` may be written as a single string or a YAML sequence.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AllowedTools {
    Single(String),
    Many(Vec<String>),
}

impl AllowedTools {
    fn into_vec(self) -> Vec<String> {
        match self {
            AllowedTools::Single(s) => vec![s],
            AllowedTools::Many(v) => v,
        }
    }
}

/// Splits a markdown file's content into `(front_matter_yaml, body)`.
/// Returns `None` if the file has no `---`-delimited front matter block.
fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---")?;
    let yaml = &rest[..end];
    let after = &rest[end + 4..];
    let body = after
        .strip_prefix('\n')
        .or_else(|| after.strip_prefix("\r\n"))
        .unwrap_or(after);
    Some((yaml, body))
}

/// Finds the single `*.md` file directly inside `dir`, if any.
fn find_markdown_file(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir).ok()?.flatten().map(|e| e.path()).find(|p| {
        p.extension().and_then(|e| e.to_str()) == Some("md")
    })
}

/// In-memory catalog of discovered skills, plus the directories it was
/// scanned from so `rescan` can be called again later.
#[derive(Debug, Default)]
pub struct SkillCatalog {
    entries: HashMap<String, SkillCatalogEntry>,
    order: Vec<String>,
}

impl SkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `paths` for skill folders. Each folder is expected to contain
    /// exactly one `*.md` file with YAML front matter; folders lacking one,
    /// or whose front matter lacks `name`/`description`, are skipped with a
    /// warning. When `auto_discover` is true, scanning recurses into
    /// subdirectories; otherwise only the immediate children of each path
    /// are considered. Duplicate skill names resolve to first occurrence.
    pub fn scan(paths: &[impl AsRef<Path>], auto_discover: bool) -> A2AResult<Self> {
        let mut catalog = Self::new();
        for root in paths {
            catalog.scan_dir(root.as_ref(), auto_discover)?;
        }
        Ok(catalog)
    }

    fn scan_dir(&mut self, dir: &Path, recurse: bool) -> A2AResult<()> {
        let read = match std::fs::read_dir(dir) {
            Ok(r) => r,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skill directory unreadable, skipping");
                return Ok(());
            }
        };

        for entry in read.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if let Some(entry) = self.load_skill_folder(&path)? {
                    self.insert(entry);
                } else if recurse {
                    self.scan_dir(&path, recurse)?;
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, entry: SkillCatalogEntry) {
        if self.entries.contains_key(&entry.name) {
            debug!(name = %entry.name, "duplicate skill name, keeping first occurrence");
            return;
        }
        self.order.push(entry.name.clone());
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Attempts to load `dir` as a single skill folder. Returns `Ok(None)`
    /// when `dir` contains no markdown file (so the caller can decide
    /// whether to recurse into it instead).
    fn load_skill_folder(&self, dir: &Path) -> A2AResult<Option<SkillCatalogEntry>> {
        let Some(md_path) = find_markdown_file(dir) else {
            return Ok(None);
        };

        let content = std::fs::read_to_string(&md_path)
            .map_err(|e| A2AError::internal_error(format!("reading {}: {e}", md_path.display())))?;

        let Some((yaml, _body)) = split_front_matter(&content) else {
            warn!(path = %md_path.display(), "skill markdown missing front matter, skipping");
            return Ok(None);
        };

        let front: FrontMatter = match serde_yaml::from_str(yaml) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %md_path.display(), error = %e, "invalid skill front matter, skipping");
                return Ok(None);
            }
        };

        let tool_decl_path = md_path.with_extension("tools.yaml");
        let has_tools = tool_decl_path.exists();

        Ok(Some(SkillCatalogEntry {
            name: front.name,
            description: front.description,
            path: dir.to_path_buf(),
            has_tools,
            allowed_tools: front.allowed_tools.map(AllowedTools::into_vec).unwrap_or_default(),
        }))
    }

    pub fn get(&self, name: &str) -> Option<&SkillCatalogEntry> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SkillCatalogEntry> {
        self.order.iter().filter_map(move |n| self.entries.get(n))
    }

    /// Builds the markdown catalog block the harness appends to the system
    /// prompt, iterating the catalog in name-sorted order rather than
    /// discovery order so the rendered list is stable regardless of scan
    /// order.
    pub fn render_instructions(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let mut sorted: Vec<&SkillCatalogEntry> = self.entries().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut out = String::from("## Available skills\n\n");
        for entry in sorted {
            out.push_str(&format!("- **{}** — {}\n", entry.name, entry.description));
        }
        out
    }

    /// Loads the full body + tool declarations for `name` (the work done by
    /// the `activate_skill` tool). Does not mutate any task context — the
    /// caller is responsible for storing the result.
    pub fn load_full(&self, name: &str) -> A2AResult<ActivatedSkill> {
        let entry = self
            .get(name)
            .ok_or_else(|| A2AError::task_not_found(format!("unknown skill: {name}")))?;

        let md_path = find_markdown_file(&entry.path)
            .ok_or_else(|| A2AError::internal_error(format!("skill {name} markdown vanished")))?;

        let content = std::fs::read_to_string(&md_path)
            .map_err(|e| A2AError::internal_error(e.to_string()))?;
        let (_front, body) = split_front_matter(&content)
            .ok_or_else(|| A2AError::internal_error(format!("skill {name} lost its front matter")))?;

        let mut tools = Vec::new();
        if entry.has_tools {
            let decl_path = md_path.with_extension("tools.yaml");
            let yaml = std::fs::read_to_string(&decl_path)
                .map_err(|e| A2AError::internal_error(e.to_string()))?;
            let declarations: Vec<ToolDeclaration> = serde_yaml::from_str(&yaml)
                .map_err(|e| A2AError::internal_error(format!("invalid tool declarations: {e}")))?;
            for decl in declarations {
                if !entry.allowed_tools.is_empty() && !entry.allowed_tools.contains(&decl.name) {
                    continue;
                }
                tools.push(ActivatedTool {
                    public_name: format!("{}_{}", decl.name, entry.name),
                    description: format!("Loaded by skill {}: {}", entry.name, decl.description),
                    input_schema: decl.input_schema,
                });
            }
        }

        Ok(ActivatedSkill {
            name: entry.name.clone(),
            body: body.trim().to_string(),
            tools,
        })
    }
}

/// Outcome of calling the built-in `activate_skill(skill_name)` tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    Success,
    AlreadyActivated,
}

/// Activates `skill_name` against `catalog`, storing the full record in
/// `activated` (the task context's `activatedSkills` map) if it is not
/// already present. Idempotent: a second activation in the same task
/// returns `AlreadyActivated` rather than reloading.
pub async fn activate_skill(
    catalog: &SkillCatalog,
    activated: &tokio::sync::RwLock<HashMap<String, ActivatedSkill>>,
    skill_name: &str,
) -> A2AResult<ActivationOutcome> {
    {
        let guard = activated.read().await;
        if guard.contains_key(skill_name) {
            return Ok(ActivationOutcome::AlreadyActivated);
        }
    }
    let full = catalog.load_full(skill_name)?;
    let mut guard = activated.write().await;
    // Re-check under the write lock in case of a concurrent activation race.
    if guard.contains_key(skill_name) {
        return Ok(ActivationOutcome::AlreadyActivated);
    }
    guard.insert(skill_name.to_string(), full);
    Ok(ActivationOutcome::Success)
}
