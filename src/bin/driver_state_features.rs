use std::path::PathBuf;

use driver_state_features::{
    apply_driver_state_batch, build_driver_state_schema, build_event_log_index, init_logging,
    load_event_table, load_query_table, log_app_finish, log_app_start, log_inputs_selected,
    logging_config_from_env, save_feature_table, BatchConfig, DuplicatePolicy, IndexBuildConfig,
    PrevLinkPolicy,
};

const USAGE: &str = "usage: driver_state_features <driver_log.csv> <queries.csv> <output.csv>";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let mut args = std::env::args_os().skip(1).map(PathBuf::from);
    let (Some(events_path), Some(queries_path), Some(output_path)) =
        (args.next(), args.next(), args.next())
    else {
        return Err(USAGE.into());
    };
    log_inputs_selected(&events_path, &queries_path, &output_path);

    let index_cfg = IndexBuildConfig {
        duplicate_policy: duplicate_policy_from_env()?,
        prev_link_policy: prev_link_policy_from_env()?,
    };
    let (index, build_report) = build_event_log_index(load_event_table(&events_path)?, &index_cfg)?;

    let table = load_query_table(&queries_path)?;
    let (rows, batch_report) =
        apply_driver_state_batch(&table.queries(), &index, &BatchConfig::default());

    let schema = build_driver_state_schema();
    save_feature_table(&output_path, &table, &rows, &schema)?;

    println!("{}", serde_json::to_string_pretty(&build_report)?);
    println!("{}", serde_json::to_string_pretty(&batch_report)?);
    log_app_finish(
        batch_report.input_rows,
        batch_report.failed_rows,
        batch_report.first_error.as_deref(),
    );

    Ok(())
}

fn duplicate_policy_from_env() -> Result<DuplicatePolicy, String> {
    match std::env::var("DSF_DUPLICATE_POLICY") {
        Err(_) => Ok(DuplicatePolicy::Reject),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" | "reject" => Ok(DuplicatePolicy::Reject),
            "keep_first" | "first" => Ok(DuplicatePolicy::KeepFirst),
            "keep_last" | "last" => Ok(DuplicatePolicy::KeepLast),
            other => Err(format!("invalid DSF_DUPLICATE_POLICY: {other}")),
        },
    }
}

fn prev_link_policy_from_env() -> Result<PrevLinkPolicy, String> {
    match std::env::var("DSF_PREV_LINK_POLICY") {
        Err(_) => Ok(PrevLinkPolicy::Recompute),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" | "recompute" => Ok(PrevLinkPolicy::Recompute),
            "reject" => Ok(PrevLinkPolicy::Reject),
            "trust_supplied" | "trust" => Ok(PrevLinkPolicy::TrustSupplied),
            other => Err(format!("invalid DSF_PREV_LINK_POLICY: {other}")),
        },
    }
}
