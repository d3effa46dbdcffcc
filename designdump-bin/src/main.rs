use anyhow::{Context, Result};
use clap::Parser;
use designdump::{ClassMap, DesignIndex, Extractor, Language, Textmap};
use path_clean::PathClean;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(author, about, long_about = None, disable_version_flag = true)]
struct Args {
    /// Path to the design data folder (or a DesignV_* index file)
    #[clap(long, value_parser)]
    design: PathBuf,

    /// Path to dump.cs
    #[clap(long, value_parser)]
    cs: PathBuf,

    /// Path to the output folder
    #[clap(long, value_parser)]
    output: PathBuf,

    /// ExcelClass - sPath map file
    #[clap(long = "excel-map", value_parser)]
    excel_map: Option<PathBuf>,

    /// Subclass index override file
    #[clap(long = "class-index", value_parser)]
    class_index: Option<PathBuf>,

    /// Parse in beta mode
    #[clap(long)]
    beta: bool,

    /// Version of the game
    #[clap(long, default_value = "1.2.53")]
    version: String,

    /// Skip textmap loading
    #[clap(long)]
    skip_textmap: bool,

    /// Skip config loading
    #[clap(long)]
    skip_config: bool,

    /// Skip excel loading
    #[clap(long)]
    skip_excel: bool,

    /// Skip story loading
    #[clap(long)]
    skip_story: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let output = args.output.clean();
    log::info!("Extracting design data for game version {}", args.version);

    let classes = ClassMap::load(&args.cs, args.class_index.as_deref())
        .context("Failed to load the class dump")?;
    let design = DesignIndex::load(&args.design).context("Failed to load the design index")?;
    let extractor = Extractor::new(&design, &classes, args.beta);

    if !args.skip_textmap {
        extract_textmaps(&design, &output)?;
    }

    let err_config = if args.skip_config {
        json!("skipped")
    } else {
        json!(extractor.load_all_configs(&output))
    };

    let err_excel = if args.skip_excel {
        json!("skipped")
    } else {
        let mapping = match &args.excel_map {
            Some(path) => Some(load_excel_map(path)?),
            None => None,
        };
        json!(extractor.load_all_excels(&output.join("ExcelOutput"), mapping.as_ref()))
    };

    let err_story = if args.skip_story {
        json!("skipped")
    } else {
        match extractor.load_all_story(&output) {
            Ok(failed) => json!(failed),
            Err(e) => {
                log::error!("Story batch failed: {}", e);
                json!([e.to_string()])
            }
        }
    };

    let report = json!({
        "config": err_config,
        "excel": err_excel,
        "story": err_story,
    });
    std::fs::create_dir_all(&output)?;
    std::fs::write(
        output.join("err.json"),
        serde_json::to_string_pretty(&report)?,
    )?;
    Ok(())
}

fn extract_textmaps(design: &DesignIndex, output: &Path) -> Result<()> {
    let mut textmap = Textmap::new();
    let dir = output.join("TextMap");
    for language in Language::ALL {
        if let Err(e) = textmap.load_language(design, language) {
            log::warn!("Failed to load textmap for {:?}: {}", language, e);
            continue;
        }
        let target = dir.join(format!("TextMap_{}.json", language.code().to_uppercase()));
        textmap
            .dump(&target)
            .with_context(|| format!("Failed to write {}", target.display()))?;
    }
    Ok(())
}

/// Excel map file shape: `{ "mapping": { class: sPath } }`.
fn load_excel_map(path: &Path) -> Result<Map<String, Value>> {
    let raw: Value = serde_json::from_str(&std::fs::read_to_string(path)?)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    raw.get("mapping")
        .and_then(Value::as_object)
        .cloned()
        .with_context(|| format!("{} has no mapping object", path.display()))
}
