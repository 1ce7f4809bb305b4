//! Integration tests for the `run` command.
use coupler::cli::{RunOpts, handle_run_command};
use coupler::settings::Settings;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Get the path to the example model.
fn get_model_dir() -> PathBuf {
    PathBuf::from("demos/simple")
}

fn run_opts(output_dir: &Path) -> RunOpts {
    RunOpts {
        output_dir: Some(output_dir.to_path_buf()),
        ..Default::default()
    }
}

/// An integration test for the `run` command.
#[test]
fn test_handle_run_command() {
    unsafe { std::env::set_var("COUPLER_LOG_LEVEL", "off") };

    // Save results to non-existent directory to check that directory creation works
    let tempdir = tempdir().unwrap();
    let output_dir = tempdir.path().join("results");
    handle_run_command(
        &get_model_dir(),
        &run_opts(&output_dir),
        Some(Settings::default()),
    )
    .unwrap();

    for file_name in [
        "price_history.csv",
        "demand_history.csv",
        "iterations.csv",
        "final_prices.csv",
        "final_demand.csv",
        "final_activity.csv",
        "metadata.toml",
        "coupler_info.log",
    ] {
        assert!(output_dir.join(file_name).is_file(), "Missing {file_name}");
    }

    // One row per iteration
    let iterations = fs::read_to_string(output_dir.join("iterations.csv")).unwrap();
    let num_iterations = iterations.lines().count() - 1;
    assert!(num_iterations >= 1);
    let price_history = fs::read_to_string(output_dir.join("price_history.csv")).unwrap();
    let header = price_history.lines().next().unwrap();
    assert_eq!(header.split(',').count(), 3 + num_iterations);

    // Global regions are not part of the price signal
    assert!(!price_history.contains("R1_GLB"));

    // The legacy cooking label is replaced
    let demand = fs::read_to_string(output_dir.join("final_demand.csv")).unwrap();
    assert!(demand.contains("cook_biomass_nc"));
    assert!(!demand.contains("non-comm"));
    assert!(!demand.contains("rc_therm"));

    // Second time will fail because the logging is already initialised
    assert_eq!(
        handle_run_command(
            &get_model_dir(),
            &run_opts(&tempdir.path().join("results2")),
            Some(Settings::default())
        )
        .unwrap_err()
        .chain()
        .next()
        .unwrap()
        .to_string(),
        "Failed to initialise logging."
    );
}
