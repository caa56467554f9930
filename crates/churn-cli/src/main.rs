use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use churn_core::Settings;
use churn_data::{
    candidate_attributes, derive_binary_targets, lag_delta_specs, with_ternary_label,
    SnapshotTable, WindowFeatureEngine,
};
use churn_model::GbdtBackend;
use churn_search::{
    CrossValidator, DesignMatrix, GainParams, HoldoutEvaluator, HyperparamConfig,
    SearchOrchestrator, SearchSpace, TpeSampler,
};
use tracing::info;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let verbose = args.iter().any(|a| a == "--verbose");
    let _guard = churn_core::logging::setup_logging(verbose)?;

    match args[1].as_str() {
        "features" => cmd_features(&args[2..]),
        "optimize" => cmd_optimize(&args[2..]),
        "test" => cmd_test(&args[2..]),
        "final" => cmd_final(&args[2..]),
        _ => {
            print_help();
            Ok(())
        }
    }
}

fn load_settings() -> Result<Settings> {
    let settings = Settings::load()?;
    info!(
        "Study {} - train {:?}, test {:?}",
        settings.study_name, settings.mes_train, settings.mes_test
    );
    Ok(settings)
}

fn make_backend() -> Result<Box<dyn GbdtBackend>> {
    #[cfg(feature = "lightgbm")]
    {
        Ok(Box::new(churn_model::LightGbmBackend))
    }
    #[cfg(not(feature = "lightgbm"))]
    {
        bail!("LightGBM feature not enabled; rebuild with --features lightgbm")
    }
}

/// Build the feature matrix: ternary label, optional monetary deflation,
/// the intra-month catalog and the lag/delta window features.
fn cmd_features(args: &[String]) -> Result<()> {
    let settings = load_settings()?;
    let out = parse_flag(args, "--out").unwrap_or_else(|| "df.parquet".to_string());
    let lags: usize = parse_flag(args, "--lags")
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);
    let deltas: usize = parse_flag(args, "--deltas")
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);

    let table = SnapshotTable::load(&settings.data_path)?;
    let table = with_ternary_label(table)?;
    let mut df = table.into_df();

    if let Some(index_path) = parse_flag(args, "--index") {
        let index = load_monetary_index(&index_path)?;
        df = churn_data::drift::deflate_monetary(df, &index)?;
    }

    df = churn_data::derived::apply_intra_month(df)?;

    // Re-wrap: the frame kept its (customer, period) order.
    let table = SnapshotTable::from_dataframe(df)?;
    let attributes = candidate_attributes(table.df(), &[]);
    let specs = lag_delta_specs(&attributes, lags, deltas);
    let engine = WindowFeatureEngine::new(&table);
    let (df, skipped) = engine.build(&specs)?;
    if !skipped.is_empty() {
        info!("Skipped attributes: {:?}", skipped);
    }

    let mut df = derive_binary_targets(df)?;
    churn_data::write_parquet(&mut df, &out)?;
    info!(
        "Feature matrix written to {} ({} rows, {} columns)",
        out,
        df.height(),
        df.width()
    );
    Ok(())
}

/// Bayesian search over the configured bounds with per-trial journaling.
fn cmd_optimize(args: &[String]) -> Result<()> {
    let settings = load_settings()?;
    let features = parse_flag(args, "--features").unwrap_or_else(|| "df.parquet".to_string());
    let n_trials: usize = parse_flag(args, "--trials")
        .and_then(|v| v.parse().ok())
        .unwrap_or(settings.n_trials);

    let df = churn_data::read_table(&features)?;
    let train = DesignMatrix::from_frame(&df, &settings.mes_train, "MES_TRAIN")?;

    let backend = make_backend()?;
    let validator = CrossValidator::new(backend.as_ref(), settings.seed());
    let journal = churn_core::TrialJournal::new(journal_path(&settings));
    let space = SearchSpace::from_settings(&settings);
    let gain = gain_params(&settings);

    let mut strategy = TpeSampler::new(settings.seed());
    let mut orchestrator =
        SearchOrchestrator::new(&mut strategy, &validator, &journal, n_trials);
    let best = orchestrator.run(&space, &train, &gain)?;

    info!(
        "Best trial {}: gain {:.0} at iteration {} with {:?}",
        best.trial_number, best.value, best.best_iteration, best.config.values
    );
    Ok(())
}

/// Retrain the best configuration and evaluate it on the held-out month.
fn cmd_test(args: &[String]) -> Result<()> {
    let settings = load_settings()?;
    let features = parse_flag(args, "--features").unwrap_or_else(|| "df.parquet".to_string());

    let df = churn_data::read_table(&features)?;
    let train = DesignMatrix::from_frame(&df, &settings.mes_train, "MES_TRAIN")?;
    let holdout = DesignMatrix::from_frame(&df, &settings.mes_test, "MES_TEST")?;

    let (config, best_iteration) = best_from_journal(&settings)?;
    let backend = make_backend()?;
    let mut evaluator =
        HoldoutEvaluator::new(backend.as_ref(), gain_params(&settings), settings.seed());
    evaluator.floor_contacts = settings.piso_envios;
    evaluator.ceiling_contacts = settings.techo_envios;

    let report = evaluator.evaluate(&train, &holdout, &config, best_iteration)?;
    info!(
        "Test gain: max {:.0} at rank {}; window cutoff {} ({:.0})",
        report.max_gain, report.max_gain_rank, report.cutoff.rank, report.cutoff.gain_at_rank
    );

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let curve_path = settings
        .resultados_dir
        .join(format!("{}_curva_ganancia_{}.json", settings.study_name, ts));
    churn_search::write_curve_json(&report.curve, &curve_path)?;
    let decisions_path = settings
        .resultados_dir
        .join(format!("{}_decisiones_{}.csv", settings.study_name, ts));
    churn_search::write_decisions_csv(&report.predictions, "contact", &decisions_path)?;
    info!(
        "Artifacts: {} and {}",
        curve_path.display(),
        decisions_path.display()
    );
    Ok(())
}

/// Final retrain on FINAL_TRAIN and submission for FINAL_PREDIC.
fn cmd_final(args: &[String]) -> Result<()> {
    let settings = load_settings()?;
    let features = parse_flag(args, "--features").unwrap_or_else(|| "df.parquet".to_string());
    let k_corte: usize = parse_flag(args, "--corte")
        .and_then(|v| v.parse().ok())
        .unwrap_or(settings.k_corte);

    let df = churn_data::read_table(&features)?;
    let train = DesignMatrix::from_frame(&df, &settings.final_train, "FINAL_TRAIN")?;
    let predict = DesignMatrix::from_frame(&df, &[settings.final_predic], "FINAL_PREDIC")?;

    let (config, best_iteration) = best_from_journal(&settings)?;
    let backend = make_backend()?;
    let evaluator =
        HoldoutEvaluator::new(backend.as_ref(), gain_params(&settings), settings.seed());

    let predictions =
        evaluator.predict_top_k(&train, &predict, &config, best_iteration, k_corte)?;

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let out = std::path::Path::new("predicciones").join(format!("{}.csv", ts));
    churn_search::write_decisions_csv(&predictions, "Predicted", &out)?;

    let contacted = predictions.iter().filter(|p| p.contact == 1).count();
    info!(
        "Submission {} written: {} rows, {} contacted (corte {})",
        out.display(),
        predictions.len(),
        contacted,
        k_corte
    );
    Ok(())
}

fn gain_params(settings: &Settings) -> GainParams {
    GainParams {
        reward: settings.ganancia_acierto,
        cost: settings.costo_estimulo,
    }
}

fn journal_path(settings: &Settings) -> std::path::PathBuf {
    settings
        .resultados_dir
        .join(format!("{}_iteraciones.json", settings.study_name))
}

/// Winning configuration and round count from the trial journal.
fn best_from_journal(settings: &Settings) -> Result<(HyperparamConfig, usize)> {
    let journal = churn_core::TrialJournal::new(journal_path(settings));
    let best = journal
        .best()?
        .ok_or_else(|| anyhow!("no completed trials in {}", journal.path().display()))?;
    let params = best
        .params
        .as_object()
        .ok_or_else(|| anyhow!("trial {} has malformed params", best.trial_number))?;
    let mut config = HyperparamConfig::default();
    for (name, value) in params {
        let value = value
            .as_f64()
            .ok_or_else(|| anyhow!("param {} is not numeric", name))?;
        config.values.insert(name.clone(), value);
    }
    let best_iteration = best
        .best_iteration
        .ok_or_else(|| anyhow!("trial {} has no best_iteration", best.trial_number))?;
    info!(
        "Using trial {} (gain {:.0}, iteration {})",
        best.trial_number, best.value, best_iteration
    );
    Ok((config, best_iteration))
}

/// Monetary index CSV with columns (foto_mes, indice).
fn load_monetary_index(path: &str) -> Result<BTreeMap<i32, f64>> {
    let df = churn_data::read_table(path)?;
    let periods = df
        .column("foto_mes")
        .context("index file needs a foto_mes column")?
        .as_materialized_series()
        .cast(&polars::prelude::DataType::Int32)?;
    let values = df
        .column("indice")
        .context("index file needs an indice column")?
        .as_materialized_series()
        .cast(&polars::prelude::DataType::Float64)?;

    let mut index = BTreeMap::new();
    for (p, v) in periods.i32()?.into_iter().zip(values.f64()?.into_iter()) {
        if let (Some(p), Some(v)) = (p, v) {
            index.insert(p, v);
        }
    }
    if index.is_empty() {
        bail!("monetary index {} is empty", path);
    }
    Ok(index)
}

fn parse_flag(args: &[String], name: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == name {
            return iter.next().cloned();
        }
    }
    None
}

fn print_help() {
    println!("churn-cli");
    println!("  features --out df.parquet [--lags 2] [--deltas 2] [--index indice.csv]");
    println!("  optimize --features df.parquet [--trials N]");
    println!("  test     --features df.parquet");
    println!("  final    --features df.parquet [--corte 9500]");
    println!();
    println!("Configuration comes from CONFIG_FILE (default conf.yaml).");
}
