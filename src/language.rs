//! Language mix of a set of PRs, derived from the file names cached during
//! enrichment.

use std::collections::HashMap;

use crate::cache::ResponseCache;
use crate::enrich::{pr_files_cache_key, CachedPrFiles};
use crate::types::PullRequest;

/// Languages for files identified by their whole (lower-cased) basename.
fn special_file_language(basename: &str) -> Option<&'static str> {
    let language = match basename {
        "dockerfile" | ".dockerignore" => "Dockerfile",
        "containerfile" => "Containerfile",
        "makefile" | "gnumakefile" => "Makefile",
        "justfile" => "Just",
        "procfile" => "Procfile",
        "cmakelists.txt" => "CMake",
        "cargo.lock" => "Rust",
        "rakefile" | "gemfile" | "podfile" | "vagrantfile" | "brewfile" | "fastfile" => "Ruby",
        "build.gradle" | "settings.gradle" | "build.gradle.kts" | "settings.gradle.kts" => {
            "Gradle"
        }
        ".bashrc" | ".bash_profile" | ".bash_aliases" => "Bash",
        ".zshrc" => "Zsh",
        ".profile" => "Shell",
        ".gitignore" | ".gitattributes" | ".gitmodules" => "Git",
        ".editorconfig" => "EditorConfig",
        ".pylintrc" | ".flake8" => "Python",
        ".eslintrc" | ".prettierrc" | ".babelrc" => "JavaScript",
        _ => return None,
    };
    Some(language)
}

fn extension_language(extension: &str) -> Option<&'static str> {
    let language = match extension {
        "py" | "pyx" | "pyi" | "pyw" => "Python",
        "js" | "jsx" | "mjs" | "cjs" => "JavaScript",
        "ts" | "tsx" | "mts" | "cts" => "TypeScript",
        "java" => "Java",
        "kt" | "kts" => "Kotlin",
        "scala" | "sc" => "Scala",
        "groovy" | "gradle" => "Groovy",
        "clj" | "cljs" | "cljc" | "edn" => "Clojure",
        "c" | "h" => "C",
        "cpp" | "cc" | "cxx" | "c++" | "hpp" | "hh" | "hxx" | "h++" => "C++",
        "cs" | "csx" => "C#",
        "fs" | "fsx" | "fsi" => "F#",
        "go" => "Go",
        "rs" => "Rust",
        "rb" | "rake" | "gemspec" | "erb" => "Ruby",
        "php" | "phtml" => "PHP",
        "swift" => "Swift",
        "m" | "mm" => "Objective-C",
        "r" | "rmd" => "R",
        "sh" => "Shell",
        "bash" => "Bash",
        "zsh" => "Zsh",
        "fish" => "Fish",
        "ps1" | "psm1" | "psd1" => "PowerShell",
        "bat" | "cmd" => "Batch",
        "pl" | "pm" => "Perl",
        "lua" => "Lua",
        "jl" => "Julia",
        "hs" | "lhs" => "Haskell",
        "ml" | "mli" => "OCaml",
        "ex" | "exs" => "Elixir",
        "erl" | "hrl" => "Erlang",
        "elm" => "Elm",
        "dart" => "Dart",
        "zig" => "Zig",
        "nim" => "Nim",
        "cr" => "Crystal",
        "lisp" | "lsp" => "Lisp",
        "el" => "Emacs Lisp",
        "scm" | "ss" => "Scheme",
        "rkt" => "Racket",
        "html" | "htm" | "xhtml" => "HTML",
        "hbs" => "Handlebars",
        "css" => "CSS",
        "scss" => "SCSS",
        "sass" => "Sass",
        "less" => "Less",
        "vue" => "Vue",
        "svelte" => "Svelte",
        "astro" => "Astro",
        "sql" => "SQL",
        "graphql" | "gql" => "GraphQL",
        "proto" => "Protocol Buffers",
        "md" | "markdown" => "Markdown",
        "rst" => "reStructuredText",
        "txt" => "Text",
        "tex" => "LaTeX",
        "adoc" => "AsciiDoc",
        "json" | "jsonc" => "JSON",
        "yaml" | "yml" => "YAML",
        "toml" => "TOML",
        "xml" => "XML",
        "ini" => "INI",
        "cfg" | "conf" => "Config",
        "tf" | "tfvars" => "Terraform",
        "bicep" => "Bicep",
        "dockerfile" => "Dockerfile",
        "mk" | "mak" => "Makefile",
        "cmake" => "CMake",
        "bazel" | "bzl" => "Bazel",
        "asm" | "s" => "Assembly",
        "wat" => "WebAssembly Text",
        "vhd" | "vhdl" => "VHDL",
        "glsl" | "vert" | "frag" => "GLSL",
        "hlsl" => "HLSL",
        "gd" => "GDScript",
        "ipynb" => "Jupyter",
        "vim" => "Vim Script",
        "pest" => "Pest",
        _ => return None,
    };
    Some(language)
}

/// Detects a file's language from its name, or `None` when unknown.
pub fn detect_language(filename: &str) -> Option<&'static str> {
    let basename = filename
        .rsplit('/')
        .next()
        .unwrap_or(filename)
        .to_ascii_lowercase();

    if let Some(language) = special_file_language(&basename) {
        return Some(language);
    }

    match basename.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => extension_language(extension),
        _ => None,
    }
}

/// Top `top_n` languages across the PRs' cached file lists, as
/// `(language, percentage of recognised files)`, most common first.
///
/// PRs without a cached file list are skipped. Ties are broken by name so
/// the ordering is stable.
pub async fn language_breakdown(
    prs: &[PullRequest],
    cache: &ResponseCache,
    top_n: usize,
) -> Vec<(String, f64)> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();

    for pr in prs {
        let Some(repo_id) = pr.repo_id() else {
            continue;
        };
        let key = pr_files_cache_key(&repo_id.owner, &repo_id.repo, pr.number);
        let Some(summary) = cache
            .get::<CachedPrFiles>(&key)
            .await
            .and_then(CachedPrFiles::into_summary)
        else {
            tracing::debug!(pr = %pr.identifier(), "No cached files for language breakdown");
            continue;
        };

        for name in &summary.file_names {
            if let Some(language) = detect_language(name) {
                *counts.entry(language).or_default() += 1;
            }
        }
    }

    let total: usize = counts.values().sum();
    if total == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<(&'static str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    ranked
        .into_iter()
        .take(top_n)
        .map(|(language, count)| (language.to_string(), count as f64 / total as f64 * 100.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::PrFileSummary;
    use crate::types::PrState;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("src/main.rs"), Some("Rust"));
        assert_eq!(detect_language("web/App.TSX"), Some("TypeScript"));
        assert_eq!(detect_language("docker/Dockerfile"), Some("Dockerfile"));
        assert_eq!(detect_language("Cargo.lock"), Some("Rust"));
        assert_eq!(detect_language("CMakeLists.txt"), Some("CMake"));
        assert_eq!(detect_language(".gitignore"), Some("Git"));
        assert_eq!(detect_language("LICENSE"), None);
        assert_eq!(detect_language("assets/logo.png"), None);
    }

    fn pr(number: u64) -> PullRequest {
        PullRequest {
            number,
            title: format!("PR {number}"),
            repository: "acme/widget".to_string(),
            organization: "acme".to_string(),
            url: format!("https://github.com/acme/widget/pull/{number}"),
            state: PrState::Open,
            created_at: Utc::now(),
            closed_at: None,
            merged_at: None,
            author: "octocat".to_string(),
            author_association: None,
            additions: None,
            deletions: None,
            changed_files: None,
            star_increase: None,
        }
    }

    #[tokio::test]
    async fn test_language_breakdown_from_cache() {
        let cache = ResponseCache::new(100);
        let ttl = Duration::from_secs(60);

        let first = PrFileSummary {
            file_names: vec!["a.rs".into(), "b.rs".into(), "README.md".into()],
            additions: 10,
            deletions: 0,
            changed_files: 3,
        };
        cache
            .set(&pr_files_cache_key("acme", "widget", 1), &CachedPrFiles::from(&first), ttl)
            .await;
        // Legacy-shaped entry, no recognised extension on the second file.
        cache
            .set_raw(&pr_files_cache_key("acme", "widget", 2), r#"[["c.rs","blob"],1,1,2]"#, ttl)
            .await;

        let breakdown = language_breakdown(&[pr(1), pr(2), pr(3)], &cache, 10).await;

        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].0, "Rust");
        assert!((breakdown[0].1 - 75.0).abs() < 1e-9);
        assert_eq!(breakdown[1].0, "Markdown");
        assert!((breakdown[1].1 - 25.0).abs() < 1e-9);

        let top_one = language_breakdown(&[pr(1), pr(2)], &cache, 1).await;
        assert_eq!(top_one.len(), 1);
    }

    #[tokio::test]
    async fn test_language_breakdown_empty_cache() {
        let cache = ResponseCache::new(10);
        assert!(language_breakdown(&[pr(1)], &cache, 5).await.is_empty());
    }
}
