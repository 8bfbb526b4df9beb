use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::app::RunOptions;
use crate::domain::{AssemblyLevel, ProteinTarget, Request};
use crate::error::SepiError;
use crate::report::OutputOptions;
use crate::resolver::{Criterion, ResolveOptions, SelectionPolicy};

pub const DEFAULT_OUTPUT: &str = "SEPI_output";

/// Built-in organism with a curated protein panel.
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub key: &'static str,
    pub organism: &'static str,
    pub proteins: &'static [&'static str],
    pub strains: &'static [(&'static str, &'static str)],
}

impl Preset {
    pub fn strain_for(&self, protein: &str) -> Option<&'static str> {
        self.strains
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(protein))
            .map(|(_, strain)| *strain)
    }
}

pub const PRESETS: &[Preset] = &[
    Preset {
        key: "ecoli",
        organism: "Escherichia coli",
        proteins: &[
            "AcrA", "AcrB", "TolC", "AcrZ", "AcrR", "MarA", "MarR", "RamA", "RamR", "SoxS", "Rob",
            "EnvR", "AcrD", "AcrE", "AcrF", "MdtB", "MdtC",
        ],
        strains: &[("AcrA", "K-12 MG1655"), ("AcrB", "K-12 MG1655")],
    },
    Preset {
        key: "klebsiella",
        organism: "Klebsiella pneumoniae",
        proteins: &["OqxA", "OqxB", "EefA", "EefB", "EefC", "KexD", "KexE", "KexF"],
        strains: &[],
    },
];

pub fn find_preset(organism: &str) -> Option<&'static Preset> {
    let organism = organism.trim();
    PRESETS
        .iter()
        .find(|preset| preset.key.eq_ignore_ascii_case(organism))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ProteinsEntry {
    List(Vec<String>),
    Csv(String),
}

/// Options accepted both at the top level and under `settings`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub organism: Option<String>,
    #[serde(default)]
    pub proteins: Option<ProteinsEntry>,
    #[serde(default)]
    pub protein_list: Option<PathBuf>,
    #[serde(default, alias = "email")]
    pub user_email: Option<String>,
    #[serde(default)]
    pub assembly_level: Option<String>,
    #[serde(default)]
    pub biosample_query: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub multi_fasta: Option<bool>,
    #[serde(default)]
    pub html_report: Option<bool>,
    #[serde(default)]
    pub retmax: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub refseq_first: Option<bool>,
    #[serde(default)]
    pub selection_order: Option<Vec<Criterion>>,
}

impl Settings {
    /// Fills every unset field from `fallback`.
    pub fn or(self, fallback: Settings) -> Settings {
        Settings {
            organism: self.organism.or(fallback.organism),
            proteins: self.proteins.or(fallback.proteins),
            protein_list: self.protein_list.or(fallback.protein_list),
            user_email: self.user_email.or(fallback.user_email),
            assembly_level: self.assembly_level.or(fallback.assembly_level),
            biosample_query: self.biosample_query.or(fallback.biosample_query),
            output: self.output.or(fallback.output),
            multi_fasta: self.multi_fasta.or(fallback.multi_fasta),
            html_report: self.html_report.or(fallback.html_report),
            retmax: self.retmax.or(fallback.retmax),
            workers: self.workers.or(fallback.workers),
            timeout_secs: self.timeout_secs.or(fallback.timeout_secs),
            refseq_first: self.refseq_first.or(fallback.refseq_first),
            selection_order: self.selection_order.or(fallback.selection_order),
        }
    }
}

/// YAML run file; entries under `settings` win over top-level ones.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(flatten)]
    pub top: Settings,
    #[serde(default)]
    pub settings: Option<Settings>,
}

impl FileConfig {
    pub fn parse(content: &str) -> Result<Self, SepiError> {
        serde_yaml::from_str(content).map_err(|err| SepiError::ConfigParse(err.to_string()))
    }

    pub fn into_settings(self) -> Settings {
        match self.settings {
            Some(nested) => nested.or(self.top),
            None => self.top,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub request: Request,
    pub run: RunOptions,
    pub output: OutputOptions,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Merges command-line settings over an optional YAML file.
    pub fn resolve(cli: Settings, config_path: Option<&Path>) -> Result<ResolvedConfig, SepiError> {
        let file = match config_path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .map_err(|_| SepiError::ConfigRead(path.to_path_buf()))?;
                FileConfig::parse(&content)?.into_settings()
            }
            None => Settings::default(),
        };
        Self::resolve_settings(cli.or(file))
    }

    pub fn resolve_settings(settings: Settings) -> Result<ResolvedConfig, SepiError> {
        let organism_arg = settings
            .organism
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .ok_or_else(|| {
                SepiError::InvalidRequest(
                    "organism is required (--organism or config file)".to_string(),
                )
            })?;
        let email = settings
            .user_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                SepiError::InvalidRequest("email is required (--email or config file)".to_string())
            })?;

        let preset = find_preset(organism_arg);
        let organism = preset.map(|p| p.organism).unwrap_or(organism_arg);
        let names = protein_names(&settings, preset)?;
        let targets = names
            .into_iter()
            .map(|name| ProteinTarget {
                strain: preset.and_then(|p| p.strain_for(&name)).map(str::to_string),
                name,
            })
            .collect();

        let assembly_level = match settings.assembly_level.as_deref() {
            Some(value) => AssemblyLevel::parse_filter(value)?,
            None => None,
        };
        let request = Request::with_targets(
            organism,
            targets,
            assembly_level,
            settings.biosample_query.clone(),
            email,
        )?;

        let retmax = settings.retmax.unwrap_or(20);
        if retmax == 0 {
            return Err(SepiError::InvalidRequest(
                "retmax must be at least 1".to_string(),
            ));
        }
        let resolve = ResolveOptions {
            retmax,
            refseq_first: settings.refseq_first.unwrap_or(true),
            timeout: settings
                .timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            selection: settings
                .selection_order
                .map(SelectionPolicy::new)
                .unwrap_or_default(),
        };
        let run = RunOptions {
            resolve,
            workers: settings.workers.unwrap_or(1).max(1),
        };

        let output = OutputOptions {
            base: Utf8PathBuf::from(settings.output.as_deref().unwrap_or(DEFAULT_OUTPUT)),
            multi_fasta: settings.multi_fasta.unwrap_or(false),
            html_report: settings.html_report.unwrap_or(false),
        };

        Ok(ResolvedConfig {
            request,
            run,
            output,
        })
    }
}

fn protein_names(settings: &Settings, preset: Option<&Preset>) -> Result<Vec<String>, SepiError> {
    if let Some(path) = &settings.protein_list {
        return read_protein_list(path);
    }
    match &settings.proteins {
        Some(ProteinsEntry::List(names)) => Ok(names.clone()),
        Some(ProteinsEntry::Csv(value)) => {
            let value = value.trim();
            if value.eq_ignore_ascii_case("all") {
                return preset_proteins(preset);
            }
            let as_path = Path::new(value);
            if value.ends_with(".txt") && as_path.is_file() {
                return read_protein_list(as_path);
            }
            Ok(value.split(',').map(|name| name.trim().to_string()).collect())
        }
        None => preset_proteins(preset),
    }
}

fn preset_proteins(preset: Option<&Preset>) -> Result<Vec<String>, SepiError> {
    preset
        .map(|p| p.proteins.iter().map(|name| name.to_string()).collect())
        .ok_or_else(|| {
            SepiError::InvalidRequest(
                "no protein names provided for a custom organism (use --proteins or --protein-list)"
                    .to_string(),
            )
        })
}

/// One name per line; blank lines and `#` comments are ignored.
pub fn read_protein_list(path: &Path) -> Result<Vec<String>, SepiError> {
    let content =
        fs::read_to_string(path).map_err(|_| SepiError::ProteinListRead(path.to_path_buf()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn base() -> Settings {
        Settings {
            organism: Some("Escherichia coli".to_string()),
            proteins: Some(ProteinsEntry::Csv("AcrA, AcrB".to_string())),
            user_email: Some("user@example.com".to_string()),
            ..Settings::default()
        }
    }

    #[test]
    fn comma_separated_proteins() {
        let resolved = ConfigLoader::resolve_settings(base()).unwrap();
        let names: Vec<_> = resolved.request.protein_names().collect();
        assert_eq!(names, vec!["AcrA", "AcrB"]);
        assert_eq!(resolved.output.base.as_str(), DEFAULT_OUTPUT);
        assert_eq!(resolved.run.workers, 1);
    }

    #[test]
    fn preset_all_expands_with_strains() {
        let settings = Settings {
            organism: Some("ecoli".to_string()),
            proteins: Some(ProteinsEntry::Csv("all".to_string())),
            ..base()
        };
        let resolved = ConfigLoader::resolve_settings(settings).unwrap();
        assert_eq!(resolved.request.organism(), "Escherichia coli");
        assert_eq!(resolved.request.proteins().len(), 17);
        assert_eq!(
            resolved.request.proteins()[0].strain.as_deref(),
            Some("K-12 MG1655")
        );
        assert_eq!(resolved.request.proteins()[2].strain, None);
    }

    #[test]
    fn custom_organism_needs_proteins() {
        let settings = Settings {
            proteins: None,
            ..base()
        };
        let err = ConfigLoader::resolve_settings(settings).unwrap_err();
        assert_matches!(err, SepiError::InvalidRequest(_));
    }

    #[test]
    fn unknown_assembly_level_fails_fast() {
        let settings = Settings {
            assembly_level: Some("invalid_level".to_string()),
            ..base()
        };
        let err = ConfigLoader::resolve_settings(settings).unwrap_err();
        assert_matches!(err, SepiError::InvalidAssemblyLevel(_));
    }

    #[test]
    fn nested_settings_override_top_level() {
        let yaml = r#"
organism: Staphylococcus aureus
proteins: [NorA, NorB]
user_email: lab@example.org
output: top
settings:
  output: nested
  assembly_level: chromosome
  selection_order: [biosample, length]
"#;
        let settings = FileConfig::parse(yaml).unwrap().into_settings();
        let resolved = ConfigLoader::resolve_settings(settings).unwrap();
        assert_eq!(resolved.output.base.as_str(), "nested");
        assert_eq!(
            resolved.request.assembly_level(),
            Some(AssemblyLevel::Chromosome)
        );
        assert_eq!(
            resolved.run.resolve.selection.order(),
            &[Criterion::Biosample, Criterion::Length]
        );
    }
}
