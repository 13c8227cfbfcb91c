use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;

const APP_JSON: &str = "app.json";
const TIMER_JSON: &str = "timer.json";
const SCHEDULER_JSON: &str = "scheduler.json";

pub const WORKSPACE_ENV: &str = "FOCUS_SCHEDULER_WORKSPACE";
pub const SCAN_INTERVAL_ENV: &str = "FOCUS_SCHEDULER_SCAN_INTERVAL_SECONDS";

pub const DEFAULT_WORK_SECONDS: u32 = 1500;
pub const DEFAULT_BREAK_SECONDS: u32 = 300;
const WORK_SECONDS_RANGE: RangeInclusive<u32> = 600..=2700;
const BREAK_SECONDS_RANGE: RangeInclusive<u32> = 180..=900;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_name: String,
    pub timezone: Tz,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    pub pomodoro_work_seconds: u32,
    pub break_seconds: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            pomodoro_work_seconds: DEFAULT_WORK_SECONDS,
            break_seconds: DEFAULT_BREAK_SECONDS,
        }
    }
}

impl TimerConfig {
    pub fn validate(&self) -> Result<(), InfraError> {
        if !WORK_SECONDS_RANGE.contains(&self.pomodoro_work_seconds) {
            return Err(InfraError::InvalidConfig(format!(
                "pomodoroWorkSeconds must be within {}..={}",
                WORK_SECONDS_RANGE.start(),
                WORK_SECONDS_RANGE.end()
            )));
        }
        if !BREAK_SECONDS_RANGE.contains(&self.break_seconds) {
            return Err(InfraError::InvalidConfig(format!(
                "breakSeconds must be within {}..={}",
                BREAK_SECONDS_RANGE.start(),
                BREAK_SECONDS_RANGE.end()
            )));
        }
        Ok(())
    }
}

/// Which periodic origin drives scans in this process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrigin {
    /// In-process interval loop.
    Foreground,
    /// No loop; scans run only when the host wakes the scheduler.
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub scan_interval_seconds: u64,
    pub tick_interval_millis: u64,
    pub promotion_granularity_seconds: u32,
    pub scan_origin: ScanOrigin,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: 15,
            tick_interval_millis: 1000,
            promotion_granularity_seconds: 60,
            scan_origin: ScanOrigin::Foreground,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub app: AppConfig,
    pub timer: TimerConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app: AppConfig {
                app_name: "Focus Scheduler".to_string(),
                timezone: Tz::UTC,
            },
            timer: TimerConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Focus Scheduler",
                "timezone": "UTC"
            }),
        ),
        (
            TIMER_JSON,
            serde_json::json!({
                "schema": 1,
                "pomodoroWorkSeconds": DEFAULT_WORK_SECONDS,
                "breakSeconds": DEFAULT_BREAK_SECONDS
            }),
        ),
        (
            SCHEDULER_JSON,
            serde_json::json!({
                "schema": 1,
                "scanIntervalSeconds": 15,
                "tickIntervalMillis": 1000,
                "promotionGranularitySeconds": 60,
                "scanOrigin": "foreground"
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn read_str<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn read_u64(value: &serde_json::Value, key: &str, path: &Path) -> Result<Option<u64>, InfraError> {
    match value.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(raw) => raw.as_u64().map(Some).ok_or_else(|| {
            InfraError::InvalidConfig(format!(
                "{key} must be a non-negative integer in {}",
                path.display()
            ))
        }),
    }
}

fn read_u32(value: &serde_json::Value, key: &str, path: &Path) -> Result<Option<u32>, InfraError> {
    read_u64(value, key, path)?
        .map(|raw| {
            u32::try_from(raw).map_err(|_| {
                InfraError::InvalidConfig(format!("{key} is out of range in {}", path.display()))
            })
        })
        .transpose()
}

pub fn parse_timezone(name: &str) -> Result<Tz, InfraError> {
    name.parse::<Tz>()
        .map_err(|_| InfraError::InvalidConfig(format!("unknown timezone '{name}'")))
}

pub fn read_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let defaults = EngineConfig::default().app;
    let timezone = match read_str(&app, "timezone") {
        Some(name) => parse_timezone(name)?,
        None => defaults.timezone,
    };
    Ok(AppConfig {
        app_name: read_str(&app, "appName")
            .map(ToOwned::to_owned)
            .unwrap_or(defaults.app_name),
        timezone,
    })
}

pub fn read_timer_config(config_dir: &Path) -> Result<TimerConfig, InfraError> {
    let path = config_dir.join(TIMER_JSON);
    let timer = read_config(&path)?;
    let defaults = TimerConfig::default();
    let config = TimerConfig {
        pomodoro_work_seconds: read_u32(&timer, "pomodoroWorkSeconds", &path)?
            .unwrap_or(defaults.pomodoro_work_seconds),
        break_seconds: read_u32(&timer, "breakSeconds", &path)?.unwrap_or(defaults.break_seconds),
    };
    config.validate()?;
    Ok(config)
}

pub fn read_scheduler_config(config_dir: &Path) -> Result<SchedulerConfig, InfraError> {
    let path = config_dir.join(SCHEDULER_JSON);
    let scheduler = read_config(&path)?;
    let defaults = SchedulerConfig::default();
    let scan_origin = match read_str(&scheduler, "scanOrigin") {
        None => defaults.scan_origin,
        Some("foreground") => ScanOrigin::Foreground,
        Some("background") => ScanOrigin::Background,
        Some(other) => {
            return Err(InfraError::InvalidConfig(format!(
                "unknown scanOrigin '{other}' in {}",
                path.display()
            )));
        }
    };
    let config = SchedulerConfig {
        scan_interval_seconds: read_u64(&scheduler, "scanIntervalSeconds", &path)?
            .unwrap_or(defaults.scan_interval_seconds),
        tick_interval_millis: read_u64(&scheduler, "tickIntervalMillis", &path)?
            .unwrap_or(defaults.tick_interval_millis),
        promotion_granularity_seconds: read_u32(&scheduler, "promotionGranularitySeconds", &path)?
            .unwrap_or(defaults.promotion_granularity_seconds),
        scan_origin,
    };
    if config.scan_interval_seconds == 0
        || config.tick_interval_millis == 0
        || config.promotion_granularity_seconds == 0
    {
        return Err(InfraError::InvalidConfig(format!(
            "scheduler intervals must be greater than zero in {}",
            path.display()
        )));
    }
    Ok(config)
}

/// Reads every config file and applies environment overrides through `env`.
pub fn load_engine_config<F>(config_dir: &Path, env: F) -> Result<EngineConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut scheduler = read_scheduler_config(config_dir)?;
    if let Some(raw) = env(SCAN_INTERVAL_ENV) {
        let seconds = raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|value| *value > 0)
            .ok_or_else(|| {
                InfraError::InvalidConfig(format!("{SCAN_INTERVAL_ENV} must be a positive integer"))
            })?;
        scheduler.scan_interval_seconds = seconds;
    }
    Ok(EngineConfig {
        app: read_app_config(config_dir)?,
        timer: read_timer_config(config_dir)?,
        scheduler,
    })
}

pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

pub fn save_timer_config(config_dir: &Path, timer: &TimerConfig) -> Result<(), InfraError> {
    timer.validate()?;
    let path = config_dir.join(TIMER_JSON);
    let mut current = read_config(&path)?;
    let object = current.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert(
        "pomodoroWorkSeconds".to_string(),
        serde_json::Value::from(timer.pomodoro_work_seconds),
    );
    object.insert(
        "breakSeconds".to_string(),
        serde_json::Value::from(timer.break_seconds),
    );

    let formatted = serde_json::to_string_pretty(&current)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}
