use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Python,
    Java,
    Go,
    Cpp,
    Ruby,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Javascript,
        Language::Python,
        Language::Java,
        Language::Go,
        Language::Cpp,
        Language::Ruby,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Go => "go",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
        }
    }

    fn conventions(self) -> Conventions {
        match self {
            Language::Javascript => Conventions {
                image: "rce/node-image:v1.0",
                source_file: "main.js",
                compile: None,
                run: &["node", "main.js"],
            },
            Language::Python => Conventions {
                image: "rce/python-image:v1.0",
                source_file: "main.py",
                compile: None,
                run: &["python3", "main.py"],
            },
            Language::Java => Conventions {
                image: "rce/java-image",
                source_file: "Main.java",
                compile: Some("javac -d . $(find . -name '*.java')"),
                run: &["java", "-cp", ".", "Main"],
            },
            Language::Go => Conventions {
                image: "rce/go-image",
                source_file: "main.go",
                compile: Some(
                    "export GOCACHE=\"${TMPDIR:-/tmp}/.gocache\" GOPATH=\"${TMPDIR:-/tmp}/.gopath\"; \
                     go build -o main $(find . -maxdepth 1 -name '*.go')",
                ),
                run: &["./main"],
            },
            Language::Cpp => Conventions {
                image: "rce/cpp-image",
                source_file: "main.cpp",
                compile: Some("g++ -O2 -o main $(find . -name '*.cpp')"),
                run: &["./main"],
            },
            Language::Ruby => Conventions {
                image: "rce/ruby-image",
                source_file: "main.rb",
                compile: None,
                run: &["ruby", "main.rb"],
            },
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| EngineError::UnsupportedLanguage(s.to_string()))
    }
}

/// Built-in per-language defaults.
struct Conventions {
    image: &'static str,
    source_file: &'static str,
    /// Shell script run inside the sandbox; sees every materialized file.
    compile: Option<&'static str>,
    run: &'static [&'static str],
}

/// Operator adjustments for one language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LanguageOverride {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub supported: Option<bool>,
}

/// Everything needed to run one language: image, file naming, commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
    pub language: Language,
    pub image: String,
    pub supported: bool,
    /// File name a single-source submission is written to.
    pub source_file: &'static str,
    compile: Option<&'static str>,
    run: &'static [&'static str],
}

impl LanguageSpec {
    fn new(language: Language) -> Self {
        let c = language.conventions();
        Self {
            language,
            image: c.image.to_string(),
            supported: true,
            source_file: c.source_file,
            compile: c.compile,
            run: c.run,
        }
    }

    pub fn compile_command(&self) -> Option<Vec<String>> {
        self.compile
            .map(|script| vec!["sh".to_string(), "-c".to_string(), script.to_string()])
    }

    pub fn run_command(&self) -> Vec<String> {
        self.run.iter().map(|s| s.to_string()).collect()
    }
}

/// Closed set of languages with their images and commands.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    entries: BTreeMap<Language, LanguageSpec>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}

impl LanguageRegistry {
    pub fn new(overrides: &HashMap<Language, LanguageOverride>) -> Self {
        let entries = Language::ALL
            .into_iter()
            .map(|language| {
                let mut spec = LanguageSpec::new(language);
                if let Some(o) = overrides.get(&language) {
                    if let Some(image) = &o.image {
                        spec.image = image.clone();
                    }
                    if let Some(supported) = o.supported {
                        spec.supported = supported;
                    }
                }
                (language, spec)
            })
            .collect();
        Self { entries }
    }

    pub fn is_supported(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Map a request's language tag to an enabled language.
    pub fn resolve(&self, name: &str) -> EngineResult<Language> {
        let language = Language::from_str(name)?;
        match self.entries.get(&language) {
            Some(spec) if spec.supported => Ok(language),
            _ => Err(EngineError::UnsupportedLanguage(name.to_string())),
        }
    }

    pub fn spec(&self, language: Language) -> EngineResult<&LanguageSpec> {
        self.entries
            .get(&language)
            .filter(|spec| spec.supported)
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))
    }

    pub fn image_for(&self, language: Language) -> EngineResult<&str> {
        self.spec(language).map(|spec| spec.image.as_str())
    }

    /// Enabled languages in a stable order.
    pub fn languages(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.entries.values().filter(|spec| spec.supported)
    }
}
