//! Quality signals read from a repository's file tree.
//!
//! Only paths and blob sizes are used. Contents are never downloaded, so lines of code and
//! README length are estimates derived from byte counts.

use super::types::{Tree, TreeEntryKind};

/// Average bytes per line used to turn blob sizes into line counts.
const BYTES_PER_LINE: u64 = 40;

/// Directories whose contents are build output, vendored code, or editor state.
const EXCLUDED_DIRECTORIES: &[&str] = &[
    ".cache", ".cargo", ".git", ".gradle", ".idea", ".ipynb_checkpoints", ".m2", ".nuget", ".pub-cache", ".venv", ".vs",
    ".vscode", "__MACOSX", "__pycache__", "_site", "bin", "bower_components", "build", "cmake-build-debug",
    "cmake-build-release", "coverage", "deps", "dist", "htmlcov", "node_modules", "obj", "out", "site-packages", "target",
    "tmp", "vendor", "venv",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "7z", "a", "apk", "bin", "bmp", "class", "db", "dll", "dmg", "doc", "docx", "dylib", "eot", "exe", "flac", "gif",
    "gz", "ico", "jar", "jpeg", "jpg", "lib", "mov", "mp3", "mp4", "o", "obj", "otf", "pdf", "png", "pyc", "rar", "so",
    "sqlite", "svg", "tar", "tgz", "ttf", "wasm", "wav", "webm", "webp", "whl", "woff", "woff2", "xls", "xlsx", "xz",
    "zip", "zst",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    "bash", "c", "cc", "clj", "cpp", "cs", "cxx", "dart", "erl", "ex", "exs", "fs", "go", "groovy", "h", "hpp", "hs",
    "java", "jl", "js", "jsx", "kt", "kts", "lua", "m", "ml", "mm", "nim", "php", "pl", "pm", "ps1", "py", "r", "rb",
    "rs", "scala", "sh", "sql", "svelte", "swift", "ts", "tsx", "vue", "zig",
];

const PACKAGE_MANIFESTS: &[&str] = &[
    "build.gradle", "build.gradle.kts", "build.sbt", "cargo.lock", "cargo.toml", "composer.json", "gemfile",
    "gemfile.lock", "go.mod", "go.sum", "package-lock.json", "package.json", "pipfile", "pipfile.lock", "pnpm-lock.yaml",
    "poetry.lock", "pom.xml", "pyproject.toml", "requirements.txt", "setup.cfg", "setup.py", "yarn.lock",
];

const PACKAGE_EXTENSIONS: &[&str] = &["csproj", "fsproj", "vbproj"];

const CI_MARKERS: &[&str] = &[".github/workflows/", ".circleci/", ".travis.yml", ".gitlab-ci.yml", "azure-pipelines.yml", "jenkinsfile", ".drone.yml", "appveyor.yml", "bitbucket-pipelines.yml"];

const DEPLOYMENT_FILES: &[&str] = &[
    "app.yaml", "chart.yaml", "containerfile", "docker-compose.yaml", "docker-compose.yml", "dockerfile", "fly.toml",
    "heroku.yml", "kustomization.yaml", "main.tf", "netlify.toml", "procfile", "serverless.yml", "vercel.json",
];

const DEPLOYMENT_DIRECTORIES: &[&str] = &["helm", "k8s", "kubernetes", "terraform"];

const DEPENDENCY_CONFIG_FILES: &[&str] = &[
    ".pre-commit-config.yaml", "deny.toml", "dependabot.yml", "renovate.json", "rust-toolchain.toml", "tox.ini",
];

const TEST_NAME_MARKERS: &[&str] = &["test_", "_test.", ".test.", ".spec.", "_spec."];

const TEST_DIRECTORIES: &[&str] = &["test", "tests", "spec", "specs", "__tests__"];

/// What a tree says about a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[expect(clippy::struct_excessive_bools, reason = "each flag is an independent signal")]
pub struct TreeSummary {
    /// Files outside excluded directories.
    pub total_files: u64,

    /// Files skipped because they live in build, vendor, or editor directories.
    pub excluded_files: u64,

    /// Estimated lines across recognized source files.
    pub lines_of_code: u64,

    /// Source files that contributed to `lines_of_code`.
    pub source_files: u64,

    pub test_files: u64,
    pub doc_files: u64,

    /// Estimated lines in the top-level README, if any.
    pub readme_lines: Option<u64>,

    pub package_manifests: u64,
    pub dependency_configs: u64,
    pub has_ci: bool,
    pub has_license: bool,
    pub has_deployment: bool,
    pub has_release_notes: bool,

    /// The listing was cut short by the host, so counts are lower bounds.
    pub truncated: bool,
}

impl TreeSummary {
    #[must_use]
    pub fn from_tree(tree: &Tree) -> Self {
        let mut summary = Self {
            truncated: tree.truncated,
            ..Self::default()
        };

        for entry in tree.tree.iter().filter(|e| e.kind == TreeEntryKind::Blob) {
            summary.add(&entry.path, entry.size.unwrap_or(0));
        }

        summary
    }

    fn add(&mut self, path: &str, size: u64) {
        if is_excluded(path) {
            self.excluded_files += 1;
            return;
        }

        self.total_files += 1;

        let lower = path.to_ascii_lowercase();
        let (directory, file_name) = lower.rsplit_once('/').unwrap_or(("", lower.as_str()));
        let extension = file_name.rsplit_once('.').map(|(_, ext)| ext);

        let is_readme = file_name.starts_with("readme");
        if is_readme || lower.starts_with("docs/") || lower.contains("/docs/") || extension == Some("md") {
            self.doc_files += 1;
        }
        if is_readme && directory.is_empty() {
            self.readme_lines = Some(self.readme_lines.unwrap_or(0).max(size.div_ceil(BYTES_PER_LINE)));
        }

        if is_test_path(directory, file_name) {
            self.test_files += 1;
        }

        if CI_MARKERS.iter().any(|marker| lower.contains(marker)) {
            self.has_ci = true;
        }

        if directory.is_empty() && (file_name.starts_with("license") || file_name.starts_with("licence") || file_name.starts_with("copying")) {
            self.has_license = true;
        }

        if PACKAGE_MANIFESTS.contains(&file_name) || extension.is_some_and(|ext| PACKAGE_EXTENSIONS.contains(&ext)) {
            self.package_manifests += 1;
        }

        if DEPENDENCY_CONFIG_FILES.contains(&file_name) {
            self.dependency_configs += 1;
        }

        if DEPLOYMENT_FILES.contains(&file_name)
            || directory.split('/').any(|part| DEPLOYMENT_DIRECTORIES.contains(&part))
            || extension == Some("tf")
        {
            self.has_deployment = true;
        }

        if file_name.starts_with("changelog") || file_name.starts_with("changes") || file_name.starts_with("releases") {
            self.has_release_notes = true;
        }

        if let Some(ext) = extension
            && SOURCE_EXTENSIONS.contains(&ext)
            && !BINARY_EXTENSIONS.contains(&ext)
        {
            self.source_files += 1;
            self.lines_of_code += size.div_ceil(BYTES_PER_LINE);
        }
    }

    /// Average estimated lines per source file, or zero without source files.
    #[must_use]
    pub const fn average_lines_per_file(&self) -> u64 {
        if self.source_files == 0 { 0 } else { self.lines_of_code / self.source_files }
    }
}

fn is_excluded(path: &str) -> bool {
    let mut parts = path.split('/');
    let file_name = parts.next_back().unwrap_or_default();
    if parts.any(|part| EXCLUDED_DIRECTORIES.contains(&part)) {
        return true;
    }

    file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn is_test_path(directory: &str, file_name: &str) -> bool {
    directory.split('/').any(|part| TEST_DIRECTORIES.contains(&part))
        || TEST_NAME_MARKERS.iter().any(|marker| file_name.contains(marker))
        || file_name.starts_with("test.")
        || file_name.starts_with("tests.")
}
