use std::f64::consts::PI;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use nalgebra::Vector3;
use serde::Serialize;

use scenario_runner_rs::geometry::so3_exp;
use scenario_runner_rs::{
    AcceleratingScenario, ConstantTwistScenario, MonteCarloOptions, PoseCovariance, RunnerConfig,
    Scenario, ScenarioRunner,
};

#[derive(Clone, Copy, Debug, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum ScenarioKind {
    /// Level and at rest
    Static,
    /// Straight line at 2 m/s
    Forward,
    /// Horizontal loop, 2 m/s with a 10 s period
    Loop,
    /// Constant acceleration from rest while slowly yawing, pitched start
    Accelerating,
}

impl ScenarioKind {
    fn build(self) -> Box<dyn Scenario + Sync> {
        match self {
            ScenarioKind::Static => Box::new(ConstantTwistScenario::stationary()),
            ScenarioKind::Forward => Box::new(ConstantTwistScenario::forward(2.0)),
            ScenarioKind::Loop => {
                let speed = 2.0;
                let yaw_rate = 2.0 * PI / 10.0;
                Box::new(ConstantTwistScenario::circle(speed / yaw_rate, speed))
            }
            ScenarioKind::Accelerating => Box::new(AcceleratingScenario::new(
                so3_exp(&Vector3::new(0.0, 0.1, 0.0)),
                Vector3::zeros(),
                Vector3::zeros(),
                Vector3::new(0.2, 0.0, 0.0),
                Vector3::new(0.0, 0.0, 0.1),
            )),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "scenario_runner")]
#[command(about = "Compare preintegrated IMU covariance against a Monte Carlo estimate", long_about = None)]
struct Args {
    /// Built-in trajectory to simulate
    #[arg(long, value_enum, default_value = "loop")]
    scenario: ScenarioKind,

    /// Integration interval in seconds (multiple of the sample time)
    #[arg(long, default_value_t = 1.0)]
    duration: f64,

    /// Monte Carlo trials
    #[arg(long, default_value_t = 1000)]
    samples: usize,

    /// Worker threads (1 = sequential trials on shared samplers)
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// JSON runner config; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// IMU sample time in seconds
    #[arg(long)]
    sample_time: Option<f64>,

    /// Gyroscope noise density (rad/s/√Hz)
    #[arg(long)]
    gyro_sigma: Option<f64>,

    /// Accelerometer noise density (m/s²/√Hz)
    #[arg(long)]
    acc_sigma: Option<f64>,

    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report {
    generated_at: String,
    scenario: ScenarioKind,
    duration: f64,
    samples: usize,
    threads: usize,
    config: RunnerConfig,
    /// Rows of the 6×6 pose covariance [rotation, translation]
    analytic_covariance: Vec<Vec<f64>>,
    monte_carlo_covariance: Vec<Vec<f64>>,
    frobenius_difference: f64,
    relative_difference: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = load_config(&args)?;
    log::info!(
        "Scenario {:?}: {} s, {} samples, {} thread(s), dt = {} s",
        args.scenario,
        args.duration,
        args.samples,
        args.threads,
        config.imu_sample_time
    );

    let scenario = args.scenario.build();
    let runner = ScenarioRunner::new(&*scenario, config.clone())?;

    let pim = runner.integrate(args.duration, None, None)?;
    let analytic = runner.pose_covariance(&pim);

    let options = MonteCarloOptions::new(args.samples);
    let estimate = if args.threads == 1 {
        runner.estimate_pose_covariance_with(args.duration, &options)?
    } else {
        runner.estimate_pose_covariance_parallel(args.duration, &options, args.threads)?
    };

    let frobenius_difference = (estimate - analytic).norm();
    let analytic_norm = analytic.norm();
    let relative_difference = if analytic_norm > 0.0 {
        frobenius_difference / analytic_norm
    } else {
        0.0
    };
    if relative_difference > 0.2 {
        log::warn!(
            "Monte Carlo estimate differs from analytic covariance by {:.1}%",
            relative_difference * 100.0
        );
    }

    let report = Report {
        generated_at: Utc::now().to_rfc3339(),
        scenario: args.scenario,
        duration: args.duration,
        samples: args.samples,
        threads: args.threads,
        config,
        analytic_covariance: rows(&analytic),
        monte_carlo_covariance: rows(&estimate),
        frobenius_difference,
        relative_difference,
    };

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            log::info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<RunnerConfig> {
    let mut config: RunnerConfig = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => RunnerConfig::default(),
    };

    if let Some(dt) = args.sample_time {
        config.imu_sample_time = dt;
    }
    if let Some(sigma) = args.gyro_sigma {
        config.gyro_sigma = sigma;
    }
    if let Some(sigma) = args.acc_sigma {
        config.acc_sigma = sigma;
    }
    Ok(config)
}

fn rows(cov: &PoseCovariance) -> Vec<Vec<f64>> {
    cov.row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}
