// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Context;
use tracing::debug;

use crate::{git, AgentSpec, Memory, RoutingRule};

/// Default confidence threshold below which memories are pruned.
pub const DEFAULT_PRUNE_CONFIDENCE: f64 = 0.2;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A tool saved into an agent's workspace (`agents/<name>/tools/<tool>`).
///
/// On disk: a YAML frontmatter block followed by the script, with the
/// executable bit set.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTool {
    pub name: String,
    pub description: String,
    pub interpreter: String,
    pub script: String,
}

#[derive(Default)]
struct GenomeState {
    agents: BTreeMap<String, AgentSpec>,
    memories: Vec<Memory>,
    rules: Vec<RoutingRule>,
}

/// Versioned store of agent specs, memories, and routing rules, backed by a
/// working directory and git.
///
/// Layout:
/// ```text
/// agents/<name>.yaml          agent specs
/// agents/<name>/{tools,files} agent workspaces
/// memories/memories.jsonl     one Memory per line
/// routing/rules.yaml          array of RoutingRule
/// metrics/                    metrics + pending evaluations
/// logs/                       session logs (git-ignored)
/// ```
///
/// Every state-changing non-operational method produces exactly one commit;
/// a rollback is itself a commit (revert).  A commit failure leaves the
/// in-memory state diverged from disk — callers treat it as fatal for that
/// mutation.  All mutations serialize on an internal write mutex (git
/// operations are intrinsically serial).
pub struct GenomeStore {
    root: PathBuf,
    state: RwLock<GenomeState>,
    write_lock: tokio::sync::Mutex<()>,
}

impl GenomeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: RwLock::new(GenomeState::default()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    pub fn memories_file(&self) -> PathBuf {
        self.root.join("memories").join("memories.jsonl")
    }

    pub fn routing_file(&self) -> PathBuf {
        self.root.join("routing").join("rules.yaml")
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.root.join("metrics")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Create the directory layout, init git, and make the initial commit.
    /// Idempotent: calling twice leaves the repo equivalent to one call.
    pub async fn init(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        for dir in ["agents", "memories", "routing", "metrics", "logs"] {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        git::ensure_repo(&self.root).await?;
        let gitignore = self.root.join(".gitignore");
        if !gitignore.exists() {
            tokio::fs::write(&gitignore, "logs/\n").await?;
        }
        git::commit_all(&self.root, "genome: init").await?;
        Ok(())
    }

    /// Scan agents, memories, and rules from disk into memory.
    pub async fn load_from_disk(&self) -> anyhow::Result<()> {
        let mut agents = BTreeMap::new();
        let agents_dir = self.agents_dir();
        if agents_dir.is_dir() {
            let mut entries = tokio::fs::read_dir(&agents_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                    continue;
                }
                let text = tokio::fs::read_to_string(&path).await?;
                let spec: AgentSpec = serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?;
                agents.insert(spec.name.clone(), spec);
            }
        }

        let memories = match tokio::fs::read_to_string(self.memories_file()).await {
            Ok(text) => text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| serde_json::from_str(l).ok())
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let rules = match tokio::fs::read_to_string(self.routing_file()).await {
            Ok(text) => serde_yaml::from_str(&text).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut state = self.state.write().unwrap();
        state.agents = agents;
        state.memories = memories;
        state.rules = rules;
        debug!(
            agents = state.agents.len(),
            memories = state.memories.len(),
            rules = state.rules.len(),
            "genome loaded"
        );
        Ok(())
    }

    /// Load bootstrap agent specs into an *empty* genome.  Returns the names
    /// added; a non-empty genome is left untouched.
    pub async fn init_from_bootstrap(&self, dir: &Path) -> anyhow::Result<Vec<String>> {
        if !self.state.read().unwrap().agents.is_empty() {
            return Ok(Vec::new());
        }
        let specs = read_bootstrap_specs(dir).await?;
        let _guard = self.write_lock.lock().await;
        let mut added = Vec::new();
        for spec in specs {
            self.write_agent_file(&spec).await?;
            added.push(spec.name.clone());
            self.state.write().unwrap().agents.insert(spec.name.clone(), spec);
        }
        if !added.is_empty() {
            git::commit_all(&self.root, &format!("genome: bootstrap {} agents", added.len()))
                .await?;
        }
        Ok(added)
    }

    /// Add any bootstrap agents missing from the genome, never overwriting
    /// existing ones.  Returns the names added; applied twice, the second
    /// call adds nothing.
    pub async fn sync_bootstrap(&self, dir: &Path) -> anyhow::Result<Vec<String>> {
        let specs = read_bootstrap_specs(dir).await?;
        let _guard = self.write_lock.lock().await;
        let mut added = Vec::new();
        for spec in specs {
            if self.state.read().unwrap().agents.contains_key(&spec.name) {
                continue;
            }
            self.write_agent_file(&spec).await?;
            added.push(spec.name.clone());
            self.state.write().unwrap().agents.insert(spec.name.clone(), spec);
        }
        if !added.is_empty() {
            git::commit_all(
                &self.root,
                &format!("genome: sync bootstrap (+{})", added.len()),
            )
            .await?;
        }
        Ok(added)
    }

    // ── Agent specs ───────────────────────────────────────────────────────────

    pub fn agents(&self) -> Vec<AgentSpec> {
        self.state.read().unwrap().agents.values().cloned().collect()
    }

    pub fn get_agent(&self, name: &str) -> Option<AgentSpec> {
        self.state.read().unwrap().agents.get(name).cloned()
    }

    pub async fn add_agent(&self, spec: AgentSpec) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_agent_file(&spec).await?;
        let name = spec.name.clone();
        self.state.write().unwrap().agents.insert(name.clone(), spec);
        git::commit_all(&self.root, &format!("genome: add agent {name}")).await
    }

    /// Replace an existing agent spec, bumping `version` by 1.
    /// Unknown agents are an error.
    pub async fn update_agent(&self, mut spec: AgentSpec) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let prior_version = self
            .state
            .read()
            .unwrap()
            .agents
            .get(&spec.name)
            .map(|s| s.version)
            .with_context(|| format!("unknown agent {:?}", spec.name))?;
        spec.version = prior_version + 1;
        self.write_agent_file(&spec).await?;
        let name = spec.name.clone();
        let version = spec.version;
        self.state.write().unwrap().agents.insert(name.clone(), spec);
        git::commit_all(&self.root, &format!("genome: update agent {name} (v{version})")).await
    }

    pub async fn remove_agent(&self, name: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.agents_dir().join(format!("{name}.yaml"));
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        self.state.write().unwrap().agents.remove(name);
        git::commit_all(&self.root, &format!("genome: remove agent {name}")).await
    }

    async fn write_agent_file(&self, spec: &AgentSpec) -> anyhow::Result<()> {
        let dir = self.agents_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let yaml = serde_yaml::to_string(spec)?;
        tokio::fs::write(dir.join(format!("{}.yaml", spec.name)), yaml).await?;
        Ok(())
    }

    // ── Routing rules ─────────────────────────────────────────────────────────

    pub fn routing_rules(&self) -> Vec<RoutingRule> {
        self.state.read().unwrap().rules.clone()
    }

    pub async fn add_routing_rule(&self, rule: RoutingRule) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let id = rule.id.clone();
        {
            let mut state = self.state.write().unwrap();
            state.rules.retain(|r| r.id != rule.id);
            state.rules.push(rule);
        }
        self.write_rules_file().await?;
        git::commit_all(&self.root, &format!("genome: add routing rule {id}")).await
    }

    pub async fn remove_routing_rule(&self, id: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.state.write().unwrap().rules.retain(|r| r.id != id);
        self.write_rules_file().await?;
        git::commit_all(&self.root, &format!("genome: remove routing rule {id}")).await
    }

    /// Rules whose condition keywords match the query, strongest first.
    pub fn match_routing_rules(&self, query: &str) -> Vec<RoutingRule> {
        let query_lower = query.to_lowercase();
        let mut matched: Vec<RoutingRule> = self
            .state
            .read()
            .unwrap()
            .rules
            .iter()
            .filter(|r| r.matches(&query_lower))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap_or(std::cmp::Ordering::Equal));
        matched
    }

    /// Drop rules whose id is not in `used_ids`.  Returns how many were removed.
    pub async fn prune_unused_routing_rules(
        &self,
        used_ids: &HashSet<String>,
    ) -> anyhow::Result<usize> {
        let _guard = self.write_lock.lock().await;
        let removed = {
            let mut state = self.state.write().unwrap();
            let before = state.rules.len();
            state.rules.retain(|r| used_ids.contains(&r.id));
            before - state.rules.len()
        };
        if removed > 0 {
            self.write_rules_file().await?;
            git::commit_all(&self.root, &format!("genome: prune {removed} routing rules"))
                .await?;
        }
        Ok(removed)
    }

    async fn write_rules_file(&self) -> anyhow::Result<()> {
        let path = self.routing_file();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let rules = self.state.read().unwrap().rules.clone();
        tokio::fs::write(&path, serde_yaml::to_string(&rules)?).await?;
        Ok(())
    }

    // ── Memories ──────────────────────────────────────────────────────────────

    pub fn memories(&self) -> Vec<Memory> {
        self.state.read().unwrap().memories.clone()
    }

    pub async fn add_memory(&self, memory: Memory) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let id = memory.id.clone();
        self.state.write().unwrap().memories.push(memory);
        self.write_memories_file().await?;
        git::commit_all(&self.root, &format!("genome: add memory {id}")).await
    }

    /// Stamp `last_used` and bump `use_count` for the given ids.
    /// Operational — rewrites the JSONL without committing.
    pub async fn mark_memories_used(&self, ids: &[String]) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let now = now_ms();
        {
            let mut state = self.state.write().unwrap();
            for m in state.memories.iter_mut() {
                if ids.contains(&m.id) {
                    m.last_used = now;
                    m.use_count += 1;
                }
            }
        }
        self.write_memories_file().await
    }

    /// Remove memories whose *stored* confidence is below the threshold.
    /// Returns how many were pruned.
    pub async fn prune_memories(&self, min_confidence: f64) -> anyhow::Result<usize> {
        let _guard = self.write_lock.lock().await;
        let removed = {
            let mut state = self.state.write().unwrap();
            let before = state.memories.len();
            state.memories.retain(|m| m.confidence >= min_confidence);
            before - state.memories.len()
        };
        if removed > 0 {
            self.write_memories_file().await?;
            git::commit_all(&self.root, &format!("genome: prune {removed} memories")).await?;
        }
        Ok(removed)
    }

    async fn write_memories_file(&self) -> anyhow::Result<()> {
        let path = self.memories_file();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let memories = self.state.read().unwrap().memories.clone();
        let mut out = String::new();
        for m in &memories {
            out.push_str(&serde_json::to_string(m)?);
            out.push('\n');
        }
        tokio::fs::write(&path, out).await?;
        Ok(())
    }

    // ── Version control ───────────────────────────────────────────────────────

    pub async fn last_commit_hash(&self) -> anyhow::Result<String> {
        git::head_hash(&self.root).await
    }

    /// Revert HEAD.  The revert is itself a commit.
    pub async fn rollback(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let head = git::head_hash(&self.root).await?;
        git::revert(&self.root, &head).await?;
        self.reload_after_rollback().await
    }

    /// Revert a specific commit.  The revert is itself a commit; no attempt
    /// is made to detect no-op reverts.
    pub async fn rollback_commit(&self, hash: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        git::revert(&self.root, hash).await?;
        self.reload_after_rollback().await
    }

    async fn reload_after_rollback(&self) -> anyhow::Result<()> {
        // The working tree changed underneath the in-memory state.
        self.load_from_disk().await
    }

    // ── Agent workspaces ──────────────────────────────────────────────────────

    fn tools_dir(&self, agent: &str) -> PathBuf {
        self.agents_dir().join(agent).join("tools")
    }

    fn files_dir(&self, agent: &str) -> PathBuf {
        self.agents_dir().join(agent).join("files")
    }

    /// Persist a tool script under the agent's workspace with YAML
    /// frontmatter and the executable bit set.
    pub async fn save_agent_tool(
        &self,
        agent: &str,
        name: &str,
        description: &str,
        script: &str,
        interpreter: Option<&str>,
    ) -> anyhow::Result<PathBuf> {
        validate_workspace_name(name)?;
        let _guard = self.write_lock.lock().await;
        let dir = self.tools_dir(agent);
        tokio::fs::create_dir_all(&dir).await?;
        let interpreter = interpreter.unwrap_or("bash");
        let body = format!(
            "---\nname: {name}\ndescription: {description}\ninterpreter: {interpreter}\n---\n{script}"
        );
        let path = dir.join(name);
        tokio::fs::write(&path, body).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o755);
            tokio::fs::set_permissions(&path, perms).await?;
        }
        git::commit_all(&self.root, &format!("genome: save tool {agent}/{name}")).await?;
        Ok(path)
    }

    /// Persist a file under the agent's workspace.
    pub async fn save_agent_file(
        &self,
        agent: &str,
        name: &str,
        content: &str,
    ) -> anyhow::Result<PathBuf> {
        validate_workspace_name(name)?;
        let _guard = self.write_lock.lock().await;
        let dir = self.files_dir(agent);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(name);
        tokio::fs::write(&path, content).await?;
        git::commit_all(&self.root, &format!("genome: save file {agent}/{name}")).await?;
        Ok(path)
    }

    /// Read back every tool in the agent's workspace.
    pub async fn load_agent_tools(&self, agent: &str) -> anyhow::Result<Vec<AgentTool>> {
        let dir = self.tools_dir(agent);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut tools = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let text = tokio::fs::read_to_string(entry.path()).await?;
            if let Some(tool) = parse_tool_frontmatter(&text) {
                tools.push(tool);
            }
        }
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    /// Names of files in the agent's workspace.
    pub async fn list_agent_files(&self, agent: &str) -> anyhow::Result<Vec<String>> {
        let dir = self.files_dir(agent);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

async fn read_bootstrap_specs(dir: &Path) -> anyhow::Result<Vec<AgentSpec>> {
    let mut specs = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading bootstrap dir {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let text = tokio::fs::read_to_string(&path).await?;
        let spec: AgentSpec = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing bootstrap spec {}", path.display()))?;
        specs.push(spec);
    }
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(specs)
}

/// Workspace entries are plain file names; separators and dot-dot would
/// escape the agent's directory.
fn validate_workspace_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == ".."
    {
        anyhow::bail!("invalid workspace name {name:?}");
    }
    Ok(())
}

/// Parse `---\nname: …\ndescription: …\ninterpreter: …\n---\n<script>`.
fn parse_tool_frontmatter(text: &str) -> Option<AgentTool> {
    let rest = text.strip_prefix("---\n")?;
    let (header, script) = rest.split_once("\n---\n")?;
    let meta: serde_yaml::Value = serde_yaml::from_str(header).ok()?;
    Some(AgentTool {
        name: meta["name"].as_str()?.to_string(),
        description: meta["description"].as_str().unwrap_or("").to_string(),
        interpreter: meta["interpreter"].as_str().unwrap_or("bash").to_string(),
        script: script.to_string(),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
