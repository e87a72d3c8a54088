use anyhow::{Context, Result, anyhow, bail};

use crate::autopilot::pid::PidGains;

const USAGE: &str = "Usage: lanekeeper [--camera <uri>] [--serial-port <path>] [--baud <rate>] \
[--width <px>] [--height <px>] [--fps <n>] [--jpeg-quality <1-100>] [--http-port <port>] \
[--threshold <0-255>] [--kp <f>] [--ki <f>] [--kd <f>] [--tolerance <px>] \
[--steer-center <deg>] [--steer-min <deg>] [--steer-max <deg>] [--verbose]";

#[derive(Clone, Debug)]
pub struct AutopilotConfig {
    pub camera_uri: String,
    pub serial_port: String,
    pub baud: u32,
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    pub jpeg_quality: u8,
    pub http_port: u16,
    pub threshold: u8,
    pub pid: PidGains,
    pub steer_center: i32,
    pub steer_min: i32,
    pub steer_max: i32,
    pub verbose: bool,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            camera_uri: "/dev/video0".to_string(),
            serial_port: "/dev/ttyUSB0".to_string(),
            baud: 921_600,
            width: 640,
            height: 480,
            fps: 30.0,
            jpeg_quality: 85,
            http_port: 8080,
            threshold: 180,
            pid: PidGains::default(),
            steer_center: 105,
            steer_min: 50,
            steer_max: 135,
            verbose: false,
        }
    }
}

impl AutopilotConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut idx = 1;
        while idx < args.len() {
            match args[idx].as_str() {
                "--camera" => config.camera_uri = take_value(args, &mut idx)?,
                "--serial-port" => config.serial_port = take_value(args, &mut idx)?,
                "--baud" => config.baud = take_parsed(args, &mut idx)?,
                "--width" => config.width = take_parsed(args, &mut idx)?,
                "--height" => config.height = take_parsed(args, &mut idx)?,
                "--fps" => config.fps = take_parsed(args, &mut idx)?,
                "--jpeg-quality" => config.jpeg_quality = take_parsed(args, &mut idx)?,
                "--http-port" => config.http_port = take_parsed(args, &mut idx)?,
                "--threshold" => config.threshold = take_parsed(args, &mut idx)?,
                "--kp" => config.pid.kp = take_parsed(args, &mut idx)?,
                "--ki" => config.pid.ki = take_parsed(args, &mut idx)?,
                "--kd" => config.pid.kd = take_parsed(args, &mut idx)?,
                "--tolerance" => config.pid.tolerance = take_parsed(args, &mut idx)?,
                "--steer-center" => config.steer_center = take_parsed(args, &mut idx)?,
                "--steer-min" => config.steer_min = take_parsed(args, &mut idx)?,
                "--steer-max" => config.steer_max = take_parsed(args, &mut idx)?,
                "--verbose" => {
                    config.verbose = true;
                    idx += 1;
                }
                "--help" | "-h" => bail!(USAGE),
                arg => bail!("Unrecognised flag: {arg}\n\n{USAGE}"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            bail!("--width and --height must be positive");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("--jpeg-quality must be between 1 and 100");
        }
        if self.fps <= 0.0 {
            bail!("--fps must be positive");
        }
        if !(0..=180).contains(&self.steer_min)
            || !(0..=180).contains(&self.steer_max)
            || self.steer_min > self.steer_max
        {
            bail!("steering bounds must satisfy 0 <= min <= max <= 180");
        }
        if !(self.steer_min..=self.steer_max).contains(&self.steer_center) {
            bail!("--steer-center must lie within [--steer-min, --steer-max]");
        }
        Ok(())
    }
}

/// Consume the flag at `idx` and return its value argument.
fn take_value(args: &[String], idx: &mut usize) -> Result<String> {
    let flag = &args[*idx];
    let value = args
        .get(*idx + 1)
        .ok_or_else(|| anyhow!("{flag} requires a value"))?
        .clone();
    *idx += 2;
    Ok(value)
}

/// Consume the flag at `idx` and parse its value argument.
fn take_parsed<T>(args: &[String], idx: &mut usize) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let flag = args[*idx].clone();
    take_value(args, idx)?
        .parse::<T>()
        .with_context(|| format!("invalid value for {flag}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("lanekeeper")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn defaults_apply_without_flags() {
        let config = AutopilotConfig::from_args(&args(&[])).unwrap();
        assert_eq!(config.camera_uri, "/dev/video0");
        assert_eq!(config.steer_center, 105);
        assert_eq!(config.pid.kp, 0.06);
    }

    #[test]
    fn flags_override_defaults() {
        let config = AutopilotConfig::from_args(&args(&[
            "--camera",
            "/dev/video2",
            "--kp",
            "0.1",
            "--jpeg-quality",
            "70",
            "--verbose",
        ]))
        .unwrap();
        assert_eq!(config.camera_uri, "/dev/video2");
        assert_eq!(config.pid.kp, 0.1);
        assert_eq!(config.jpeg_quality, 70);
        assert!(config.verbose);
    }

    #[test]
    fn unknown_flags_and_bad_bounds_are_rejected() {
        assert!(AutopilotConfig::from_args(&args(&["--warp-speed", "9"])).is_err());
        assert!(AutopilotConfig::from_args(&args(&["--jpeg-quality", "0"])).is_err());
        assert!(
            AutopilotConfig::from_args(&args(&["--steer-min", "120", "--steer-max", "60"]))
                .is_err()
        );
        assert!(AutopilotConfig::from_args(&args(&["--steer-center", "140"])).is_err());
    }

    #[test]
    fn flag_values_must_parse() {
        assert!(AutopilotConfig::from_args(&args(&["--baud", "fast"])).is_err());
        assert!(AutopilotConfig::from_args(&args(&["--kp"])).is_err());
    }
}
