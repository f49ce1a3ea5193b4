// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A command-line frontend for the opcat catalog toolkit.
//!
//! # Commands
//!
//! * `render`: materialize catalog refs into a declarative config
//! * `diff`: compute the bundles needed to move between two catalogs
//! * `serve`: serve a catalog directory over the query API
//! * `list`: print packages, channels or bundles of a catalog
//! * `init`: generate an `olm.package` document
//! * `validate`: check a declarative config directory
//!
//! All commands exit 0 on success and non-zero on any surfaced error.

mod images;
mod serve;

pub use images::UnavailableImageSource;
pub use serve::ServeOptions;

use camino::Utf8PathBuf;
use clap::{Args, Subcommand, ValueEnum};
use color_eyre::eyre::{bail, Result, WrapErr};
use opcat::declcfg::{self, DeclarativeConfig, Icon};
use opcat::diff::{diff, DiffConfig, DiffIncludeConfig, NonHeadPolicy};
use opcat::model::Model;
use opcat::render::{RefMask, Render};
use opcat_cmdlib::ImageClientOptions;
use std::fs;
use std::io::Write;
use std::time::Duration;

/// Serialization format for rendered output.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Indented JSON documents.
    Json,
    /// `---`-separated YAML documents.
    Yaml,
}

fn write_output(cfg: &DeclarativeConfig, format: OutputFormat, w: &mut dyn Write) -> Result<()> {
    match format {
        OutputFormat::Json => declcfg::write_json(cfg, w)?,
        OutputFormat::Yaml => declcfg::write_yaml(cfg, w)?,
    }
    Ok(())
}

#[derive(Args, Debug)]
pub struct RenderOptions {
    /// Catalog refs to render: declarative config directories or images
    #[arg(required = true, value_name = "REF")]
    refs: Vec<String>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value = "json")]
    output: OutputFormat,
}

impl RenderOptions {
    pub fn exec(&self, images: &ImageClientOptions) -> Result<()> {
        let source = UnavailableImageSource::new(images.clone());
        let render = Render {
            refs: self.refs.clone(),
            allowed_ref_mask: RefMask::ALL,
            image_source: &source,
        };
        let cfg = render.run()?;
        write_output(&cfg, self.output, &mut std::io::stdout().lock())
    }
}

/// How `diff` treats non-head bundles named by a non-additive include file
/// in heads-only mode. There is deliberately no default.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum NonHeadsArg {
    /// Restrict the output to exactly the named bundles.
    Include,
    /// Refuse the diff, naming the offending bundle.
    Reject,
}

impl From<NonHeadsArg> for NonHeadPolicy {
    fn from(arg: NonHeadsArg) -> Self {
        match arg {
            NonHeadsArg::Include => NonHeadPolicy::Include,
            NonHeadsArg::Reject => NonHeadPolicy::Reject,
        }
    }
}

#[derive(Args, Debug)]
pub struct DiffOptions {
    /// Catalog refs: `OLD NEW`, or just `NEW` for heads-only output
    #[arg(required = true, num_args = 1..=2, value_name = "REF")]
    refs: Vec<String>,

    /// Restrict the diff to the packages, channels and versions in this
    /// YAML file
    #[arg(short = 'i', long = "include-file", value_name = "PATH")]
    include_file: Option<Utf8PathBuf>,

    /// Union the include file with the default diff output instead of
    /// replacing it
    #[arg(long)]
    include_additive: bool,

    /// Skip dependency resolution
    #[arg(long)]
    skip_deps: bool,

    /// Extract channel heads only; valid with a single ref
    #[arg(long)]
    heads_only: bool,

    /// How to treat non-head bundles named by the include file
    #[arg(long = "non-heads", value_enum, value_name = "POLICY")]
    non_heads: Option<NonHeadsArg>,

    /// Deadline for the whole diff, in seconds
    #[arg(long, default_value_t = 60, value_name = "SECONDS")]
    timeout: u64,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value = "yaml")]
    output: OutputFormat,
}

impl DiffOptions {
    pub fn exec(&self, images: &ImageClientOptions) -> Result<()> {
        if self.include_additive && self.include_file.is_none() {
            bail!("--include-additive requires --include-file");
        }
        if self.heads_only && self.refs.len() > 1 {
            bail!("--heads-only takes a single catalog ref");
        }

        let include = match &self.include_file {
            Some(path) => {
                let file = fs::File::open(path)
                    .with_context(|| format!("open include file {}", path))?;
                Some(DiffIncludeConfig::from_reader(file)?)
            }
            None => None,
        };
        let config = DiffConfig {
            skip_dependencies: self.skip_deps,
            include,
            include_additive: self.include_additive,
            non_head_policy: self.non_heads.map(Into::into),
        };

        let (old_ref, new_ref) = match self.refs.as_slice() {
            [old, new] => (Some(old.clone()), new.clone()),
            [new] => (None, new.clone()),
            _ => unreachable!("clap enforces 1..=2 refs"),
        };
        let images = images.clone();
        let work = move || -> Result<DeclarativeConfig, opcat::Error> {
            let source = UnavailableImageSource::new(images);
            // The diff driver accepts catalogs only, never raw bundle refs.
            let mask = RefMask::DC_DIR | RefMask::DC_IMAGE;
            let render_one = |r: &str| -> Result<Model, opcat::Error> {
                let render = Render {
                    refs: vec![r.to_string()],
                    allowed_ref_mask: mask,
                    image_source: &source,
                };
                render.run()?.to_model()
            };
            let old_model = match &old_ref {
                Some(r) => render_one(r)?,
                None => Model::default(),
            };
            let new_model = render_one(&new_ref)?;
            let out = diff(&old_model, &new_model, &config)?;
            Ok(declcfg::convert_from_model(&out))
        };

        let runtime = tokio::runtime::Runtime::new()?;
        let timeout = Duration::from_secs(self.timeout);
        let cfg = match runtime.block_on(async move {
            tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await
        }) {
            Err(_) => bail!("diff timed out after {}s", self.timeout),
            Ok(joined) => joined.context("diff worker panicked")??,
        };

        write_output(&cfg, self.output, &mut std::io::stdout().lock())
    }
}

#[derive(Debug, Subcommand)]
pub enum ListOptions {
    /// List the packages in a catalog
    Packages {
        /// Catalog ref
        #[arg(value_name = "REF")]
        catalog: String,
    },
    /// List the channels in a catalog, with their current heads
    Channels {
        /// Catalog ref
        #[arg(value_name = "REF")]
        catalog: String,
        /// Restrict the listing to one package
        package: Option<String>,
    },
    /// List the bundles in a catalog
    Bundles {
        /// Catalog ref
        #[arg(value_name = "REF")]
        catalog: String,
        /// Restrict the listing to one package
        package: Option<String>,
    },
}

impl ListOptions {
    pub fn exec(&self, images: &ImageClientOptions) -> Result<()> {
        let (catalog, package) = match self {
            ListOptions::Packages { catalog } => (catalog, None),
            ListOptions::Channels { catalog, package }
            | ListOptions::Bundles { catalog, package } => (catalog, package.as_deref()),
        };
        let source = UnavailableImageSource::new(images.clone());
        let render = Render {
            refs: vec![catalog.clone()],
            allowed_ref_mask: RefMask::ALL,
            image_source: &source,
        };
        let model = render.run()?.to_model()?;
        if let Some(package) = package {
            if !model.packages.contains_key(package) {
                bail!("package {:?} not found in {}", package, catalog);
            }
        }

        let mut rows = Vec::new();
        match self {
            ListOptions::Packages { .. } => {
                rows.push(vec![
                    "NAME".to_string(),
                    "DEFAULT CHANNEL".to_string(),
                    "# CHANNELS".to_string(),
                ]);
                for pkg in model.packages.values() {
                    rows.push(vec![
                        pkg.name.clone(),
                        pkg.default_channel.clone(),
                        pkg.channels.len().to_string(),
                    ]);
                }
            }
            ListOptions::Channels { .. } => {
                rows.push(vec![
                    "PACKAGE".to_string(),
                    "CHANNEL".to_string(),
                    "HEAD".to_string(),
                ]);
                for pkg in model.packages.values() {
                    if package.is_some_and(|p| p != pkg.name) {
                        continue;
                    }
                    for channel in pkg.channels.values() {
                        let head = if channel.bundles.is_empty() {
                            String::new()
                        } else {
                            channel.head()?.name.clone()
                        };
                        rows.push(vec![pkg.name.clone(), channel.name.clone(), head]);
                    }
                }
            }
            ListOptions::Bundles { .. } => {
                rows.push(vec![
                    "PACKAGE".to_string(),
                    "CHANNEL".to_string(),
                    "BUNDLE".to_string(),
                    "VERSION".to_string(),
                    "REPLACES".to_string(),
                    "IMAGE".to_string(),
                ]);
                for pkg in model.packages.values() {
                    if package.is_some_and(|p| p != pkg.name) {
                        continue;
                    }
                    for channel in pkg.channels.values() {
                        for bundle in channel.bundles.values() {
                            rows.push(vec![
                                pkg.name.clone(),
                                channel.name.clone(),
                                bundle.name.clone(),
                                bundle.version.to_string(),
                                bundle.replaces.clone(),
                                bundle.image.clone(),
                            ]);
                        }
                    }
                }
            }
        }
        print_table(&rows, &mut std::io::stdout().lock())
    }
}

/// Prints rows in aligned columns, two spaces apart.
fn print_table(rows: &[Vec<String>], w: &mut dyn Write) -> Result<()> {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }
    for row in rows {
        let mut line = String::new();
        for (i, cell) in row.iter().enumerate() {
            if i + 1 == row.len() {
                line.push_str(cell);
            } else {
                line.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
            }
        }
        writeln!(w, "{}", line.trim_end())?;
    }
    Ok(())
}

#[derive(Args, Debug)]
pub struct InitOptions {
    /// Name of the package
    #[arg(value_name = "PACKAGE")]
    package: String,

    /// The package's default channel
    #[arg(short = 'c', long, default_value = "", value_name = "CHANNEL")]
    default_channel: String,

    /// Path to a markdown file describing the package
    #[arg(short = 'd', long, value_name = "PATH")]
    description_file: Option<Utf8PathBuf>,

    /// Path to an icon file (SVG, PNG, JPEG or GIF)
    #[arg(short = 'i', long, value_name = "PATH")]
    icon_file: Option<Utf8PathBuf>,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value = "json")]
    output: OutputFormat,
}

impl InitOptions {
    pub fn exec(&self) -> Result<()> {
        let mut pkg =
            declcfg::Package::new(self.package.as_str(), self.default_channel.as_str());
        if let Some(path) = &self.description_file {
            pkg.description = fs::read_to_string(path)
                .with_context(|| format!("read description file {}", path))?;
        }
        if let Some(path) = &self.icon_file {
            let media_type = media_type_for(path)?;
            let data =
                fs::read(path).with_context(|| format!("read icon file {}", path))?;
            pkg.icon = Some(Icon {
                data,
                media_type: media_type.to_string(),
            });
        }

        let cfg = DeclarativeConfig {
            packages: vec![pkg],
            ..Default::default()
        };
        write_output(&cfg, self.output, &mut std::io::stdout().lock())
    }
}

fn media_type_for(path: &Utf8PathBuf) -> Result<&'static str> {
    match path.extension() {
        Some("svg") => Ok("image/svg+xml"),
        Some("png") => Ok("image/png"),
        Some("jpg") | Some("jpeg") => Ok("image/jpeg"),
        Some("gif") => Ok("image/gif"),
        _ => bail!("could not detect media type of icon file {}", path),
    }
}

#[derive(Args, Debug)]
pub struct ValidateOptions {
    /// Declarative config directory to validate
    #[arg(value_name = "DIR")]
    dir: Utf8PathBuf,
}

impl ValidateOptions {
    pub fn exec(&self) -> Result<()> {
        let cfg = declcfg::load_fs(&self.dir)?;
        cfg.to_model()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn output_formats_serialize() {
        let cfg = fixtures::foo_catalog();

        let mut json = Vec::new();
        write_output(&cfg, OutputFormat::Json, &mut json).expect("JSON writes");
        assert!(String::from_utf8(json)
            .expect("JSON output is UTF-8")
            .contains("\"schema\": \"olm.package\""));

        let mut yaml = Vec::new();
        write_output(&cfg, OutputFormat::Yaml, &mut yaml).expect("YAML writes");
        assert!(String::from_utf8(yaml)
            .expect("YAML output is UTF-8")
            .starts_with("---\n"));
    }

    #[test]
    fn icon_media_types() {
        assert_eq!(
            media_type_for(&Utf8PathBuf::from("icon.svg")).expect("svg detects"),
            "image/svg+xml"
        );
        assert_eq!(
            media_type_for(&Utf8PathBuf::from("icon.png")).expect("png detects"),
            "image/png"
        );
        assert!(media_type_for(&Utf8PathBuf::from("icon.txt")).is_err());
    }

    #[test]
    fn tables_align_columns() {
        let rows = vec![
            vec!["NAME".to_string(), "CHANNEL".to_string()],
            vec!["etcd".to_string(), "stable".to_string()],
        ];
        let mut out = Vec::new();
        print_table(&rows, &mut out).expect("table prints");
        assert_eq!(
            String::from_utf8(out).expect("table output is UTF-8"),
            "NAME  CHANNEL\netcd  stable\n"
        );
    }
}
