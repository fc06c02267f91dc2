//! Every slash command the Codeius clients know about.
//!
//! The catalog is used to tell "this command exists, just not here" apart from
//! a typo.  Whether a command actually runs depends on what the dispatcher has
//! registered.

/// One known command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Name without the leading `/`.
    pub name: &'static str,
    /// Argument synopsis, possibly empty.
    pub args: &'static str,
    /// One-line description.
    pub description: &'static str,
}

impl CatalogEntry {
    /// Returns the usage line, e.g. `/switch [model_key]`.
    pub fn usage(&self) -> String {
        if self.args.is_empty() {
            format!("/{}", self.name)
        } else {
            format!("/{} {}", self.name, self.args)
        }
    }
}

const fn entry(name: &'static str, args: &'static str, description: &'static str) -> CatalogEntry {
    CatalogEntry {
        name,
        args,
        description,
    }
}

/// The full command list, in display order.
pub const KNOWN_COMMANDS: &[CatalogEntry] = &[
    entry("models", "", "List all available AI models"),
    entry("mcp", "", "List available MCP tools"),
    entry("dashboard", "", "Show real-time code quality dashboard"),
    entry("themes", "", "Show available visual themes"),
    entry("add_model", "", "Add a custom AI model with API key and endpoint"),
    entry("shell", "[command]", "Execute a direct shell command securely"),
    entry("toggle", "", "Toggle between Interaction and Shell modes"),
    entry("mode", "", "Alternative command for toggling modes"),
    entry("keys", "", "Show mode switching options"),
    entry("shortcuts", "", "Show mode switching options"),
    entry("ocr", "[image_path]", "Extract text from an image using OCR"),
    entry("refactor", "[file_path]", "Analyze and refactor code in a file"),
    entry("diff", "[file1] [file2]", "Compare two files or directories"),
    entry("scaffold", "[name] [template]", "Generate project scaffolding"),
    entry("env", "[action] [variables]", "Manage environment files"),
    entry("rename", "[old] [new] [file]", "Batch rename variables"),
    entry("plot", "[metric]", "Plot code metrics and data"),
    entry("update_docs", "[type] [args]", "Update documentation files"),
    entry("snippet", "[action] [args]", "Manage code snippets"),
    entry("scrape", "[file_or_dir_or_url] [css_selector]", "Scrape web content"),
    entry("config", "[action] [args]", "Manage configurations"),
    entry("schedule", "[task_type] [interval] [target]", "Schedule tasks to run automatically"),
    entry("inspect", "[package]", "Inspect package information"),
    entry("context", "", "Show current project context information"),
    entry("set_project", "[path] [name]", "Set the current project context"),
    entry("search", "[query]", "Semantic search across the codebase"),
    entry("find_function", "[name]", "Find a function by name"),
    entry("find_class", "[name]", "Find a class by name"),
    entry("file_context", "[file_path]", "Show context for a specific file"),
    entry("autodetect", "", "Auto-detect and set project context"),
    entry("security_scan", "", "Run comprehensive security scan"),
    entry("secrets_scan", "", "Scan for secrets and sensitive information"),
    entry("vuln_scan", "", "Scan for code vulnerabilities"),
    entry("policy_check", "", "Check for policy violations"),
    entry("security_policy", "", "Show current security policy settings"),
    entry("security_report", "", "Generate comprehensive security report"),
    entry("set_policy", "[key] [value]", "Update security policy setting"),
    entry("plugins", "", "List available plugins"),
    entry("create_plugin", "[name]", "Create a new plugin skeleton"),
    entry("switch", "[model_key]", "Switch to a specific model"),
    entry("gen_viz", "", "Generate all project visualizations"),
    entry("dep_graph", "", "Show dependency graph visualization"),
    entry("proj_struct", "", "Show project structure visualization"),
    entry("perf_dash", "", "Show performance metrics dashboard"),
    entry("performance", "", "Show performance metrics dashboard"),
    entry("viz_summary", "", "Show analysis summary dashboard"),
    entry("analyze", "", "Analyze the current project structure and content"),
    entry("run_test", "[file_path]", "Run a specific test file"),
    entry("test", "", "Run all tests"),
    entry("help", "", "Show help message"),
    entry("clear", "", "Clear the conversation history"),
    entry("exit", "", "Exit the application"),
];

/// Looks up a command by name, ignoring case and a leading `/`.
pub fn lookup(name: &str) -> Option<&'static CatalogEntry> {
    let name = name.strip_prefix('/').unwrap_or(name);
    KNOWN_COMMANDS
        .iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(name))
}

/// Returns true if any Codeius surface implements `name`.
pub fn is_known(name: &str) -> bool {
    lookup(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("/MODELS").map(|e| e.name), Some("models"));
        assert_eq!(lookup("switch").map(|e| e.usage()), Some("/switch [model_key]".to_string()));
        assert!(lookup("definitely_not_a_command").is_none());
    }

    #[test]
    fn names_are_unique_and_bare() {
        let mut names: Vec<&str> = KNOWN_COMMANDS.iter().map(|e| e.name).collect();
        assert!(names.iter().all(|n| !n.starts_with('/') && !n.contains(' ')));
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), KNOWN_COMMANDS.len());
    }

    #[test]
    fn catalog_covers_the_basics() {
        for name in ["help", "clear", "exit", "models", "switch", "mcp", "security_scan"] {
            assert!(is_known(name), "{name} missing from catalog");
        }
    }
}
