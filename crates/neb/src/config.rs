//! Configuration settings for a nudged elastic band run

use std::{
    error::Error,
    fmt::{Debug, Display},
    fs::read_to_string,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use pes::{Geom, GeomError, Resources, Script};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    NebError, chain::Chain, force::Springs, integrator::Integrator,
    scheduler::OnFailure,
};

#[cfg(test)]
mod tests;

/// `$VAR` or `${VAR}`
static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{(\w+)\}|(\w+))").expect("valid regex")
});

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// failed to read the named file
    Read(String, std::io::ErrorKind),
    /// the TOML itself was malformed or had the wrong types
    Parse(String),
    /// the initial path did not parse as XYZ
    Geom(GeomError),
    /// an environment variable referenced in the config was not set
    MissingVar(String),
    /// a value was out of its allowed range
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(file, kind) => {
                write!(f, "failed to read {file}: {kind}")
            }
            ConfigError::Parse(e) => write!(f, "failed to parse config: {e}"),
            ConfigError::Geom(e) => write!(f, "invalid initial path: {e}"),
            ConfigError::MissingVar(v) => {
                write!(f, "environment variable ${v} is not set")
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for ConfigError {}

impl From<GeomError> for ConfigError {
    fn from(e: GeomError) -> Self {
        Self::Geom(e)
    }
}

/// Text fields can either be literal strings in the config file, or the name
/// of a file to be loaded
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(untagged)]
enum TemplateSrc {
    Literal(String),
    File { file: String },
}

impl TemplateSrc {
    fn load(self) -> Result<String, ConfigError> {
        match self {
            TemplateSrc::Literal(s) => Ok(s),
            TemplateSrc::File { file } => read_to_string(&file)
                .map_err(|e| ConfigError::Read(file, e.kind())),
        }
    }

    fn file_stem(&self) -> Option<String> {
        match self {
            TemplateSrc::Literal(_) => None,
            TemplateSrc::File { file } => Path::new(file)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned()),
        }
    }
}

/// a command line given either as one string split on whitespace or as a
/// list of arguments
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(untagged)]
enum Command {
    Line(String),
    Args(Vec<String>),
}

impl From<Command> for Vec<String> {
    fn from(value: Command) -> Self {
        match value {
            Command::Line(s) => {
                s.split_whitespace().map(str::to_owned).collect()
            }
            Command::Args(v) => v,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
struct RawCalculator {
    /// The program to run for each image. It is run in the image's scratch
    /// directory with the input file name, the number of processors, and the
    /// memory appended as arguments.
    command: Command,

    /// The name of the input file rendered from `template`.
    input: Option<String>,

    /// The file the program leaves the energy and gradient in.
    output: Option<String>,

    /// An optional template for the input file. Supported directives are
    /// {{.geom}}, {{.nprocs}}, and {{.mem}}.
    template: Option<TemplateSrc>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntegratorKind {
    #[default]
    Verlet,
    Bfgs,
}

impl Display for IntegratorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegratorKind::Verlet => write!(f, "verlet"),
            IntegratorKind::Bfgs => write!(f, "bfgs"),
        }
    }
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    /// The initial path as a multi-frame XYZ file, from the reactant to the
    /// product. At least two frames are required.
    path: TemplateSrc,

    /// The electronic state of each frame in `path`. All zero by default.
    states: Option<Vec<usize>>,

    /// The number of images to insert by linear interpolation between each
    /// pair of frames in `path`.
    interpolate: Option<usize>,

    /// A tag for the names of the output files. Defaults to the stem of the
    /// `path` file.
    name: Option<String>,

    /// Spring constant between images on the same state.
    force_constant: Option<f64>,

    /// Spring constant between images on different states.
    force_constant_switch: Option<f64>,

    mass: Option<f64>,

    /// The run has converged once the effective force on every image is
    /// below this.
    tolerance: Option<f64>,

    nsteps: Option<usize>,

    /// Time step for Verlet dynamics.
    dt: Option<f64>,

    /// Friction for Verlet dynamics, from 0 (none) toward 1.
    friction: Option<f64>,

    /// The largest distance any atom may move in one BFGS step.
    max_step: Option<f64>,

    /// Whether the endpoints relax toward their minima or stay where they
    /// are.
    optimize_endpoints: Option<bool>,

    /// The interval in iterations between snapshot files.
    print_every: Option<usize>,

    integrator: Option<IntegratorKind>,

    procs_per_image: Option<usize>,

    mem_per_image: Option<String>,

    /// The number of images to evaluate at the same time.
    parallel_images: Option<usize>,

    /// The directory holding the IMAGE_xx working directories. Environment
    /// variables written as $VAR or ${VAR} are expanded.
    scratch_dir: Option<String>,

    /// "abort" to stop the run when any calculation fails, or "quarantine"
    /// to keep the failed image's previous results and continue.
    on_failure: Option<OnFailure>,

    calculator: RawCalculator,
}

/// The external program that evaluates each image
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculatorConfig {
    pub command: Vec<String>,
    pub input: String,
    pub output: String,
    pub template: Option<String>,
}

impl CalculatorConfig {
    pub fn script(&self) -> Script {
        Script::new(self.command.clone())
            .input(&self.input)
            .output(&self.output)
            .template(self.template.clone())
    }
}

/// Load a full `Config` with [Config::load] from a TOML file.
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(try_from = "RawConfig")]
pub struct Config {
    /// the geometries of the initial path, before interpolation
    pub geometries: Vec<Geom>,
    pub states: Vec<usize>,
    pub interpolate: usize,
    pub name: String,
    pub force_constant: f64,
    pub force_constant_switch: f64,
    pub mass: f64,
    pub tolerance: f64,
    pub nsteps: usize,
    pub dt: f64,
    pub friction: f64,
    pub max_step: f64,
    pub optimize_endpoints: bool,
    pub print_every: usize,
    pub integrator: IntegratorKind,
    pub procs_per_image: usize,
    pub mem_per_image: String,
    pub parallel_images: usize,
    /// with environment variables already expanded
    pub scratch_dir: String,
    pub on_failure: OnFailure,
    pub calculator: CalculatorConfig,
}

/// replace `$VAR` and `${VAR}` in `s` with their values in the environment
pub fn expand_vars(s: &str) -> Result<String, ConfigError> {
    let mut ret = String::with_capacity(s.len());
    let mut last = 0;
    for cap in ENV_VAR.captures_iter(s) {
        let (Some(m), Some(var)) = (cap.get(0), cap.get(1).or(cap.get(2)))
        else {
            continue;
        };
        let val = std::env::var(var.as_str())
            .map_err(|_| ConfigError::MissingVar(var.as_str().to_owned()))?;
        ret.push_str(&s[last..m.start()]);
        ret.push_str(&val);
        last = m.end();
    }
    ret.push_str(&s[last..]);
    Ok(ret)
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(rc: RawConfig) -> Result<Self, Self::Error> {
        let name = rc
            .name
            .or_else(|| rc.path.file_stem())
            .unwrap_or_else(|| "path".to_owned());
        let geometries = Geom::frames(&rc.path.load()?)?;
        let scratch_dir =
            expand_vars(rc.scratch_dir.as_deref().unwrap_or("scratch"))?;
        let calc = rc.calculator;
        let ret = Self {
            states: rc.states.unwrap_or_else(|| vec![0; geometries.len()]),
            geometries,
            interpolate: rc.interpolate.unwrap_or(0),
            name,
            force_constant: rc.force_constant.unwrap_or(1.0),
            force_constant_switch: rc.force_constant_switch.unwrap_or(5.0),
            mass: rc.mass.unwrap_or(1.0),
            tolerance: rc.tolerance.unwrap_or(0.02),
            nsteps: rc.nsteps.unwrap_or(1000),
            dt: rc.dt.unwrap_or(0.1),
            friction: rc.friction.unwrap_or(0.2),
            max_step: rc.max_step.unwrap_or(0.04),
            optimize_endpoints: rc.optimize_endpoints.unwrap_or(false),
            print_every: rc.print_every.unwrap_or(1),
            integrator: rc.integrator.unwrap_or_default(),
            procs_per_image: rc.procs_per_image.unwrap_or(1),
            mem_per_image: rc
                .mem_per_image
                .unwrap_or_else(|| "6Gb".to_owned()),
            parallel_images: rc.parallel_images.unwrap_or(1),
            scratch_dir,
            on_failure: rc.on_failure.unwrap_or_default(),
            calculator: CalculatorConfig {
                command: calc.command.into(),
                input: calc.input.unwrap_or_else(|| "neb.inp".to_owned()),
                output: calc.output.unwrap_or_else(|| "FORCE.out".to_owned()),
                template: calc.template.map(TemplateSrc::load).transpose()?,
            },
        };
        ret.validate()?;
        Ok(ret)
    }
}

impl Config {
    /// load a [Config] from the TOML file specified by `filename`
    pub fn load<P>(filename: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path> + Debug,
    {
        let contents = read_to_string(&filename).map_err(|e| {
            ConfigError::Read(
                filename.as_ref().display().to_string(),
                e.kind(),
            )
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::try_from(raw)
    }

    /// check that the settings in `self` make any sense
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("tolerance", self.tolerance),
            ("mass", self.mass),
            ("dt", self.dt),
            ("max_step", self.max_step),
        ];
        for (name, v) in positive {
            if v.is_nan() || v <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive, got {v}"
                )));
            }
        }
        if !(0.0..1.0).contains(&self.friction) {
            return Err(ConfigError::Invalid(format!(
                "friction must be in [0, 1), got {}",
                self.friction
            )));
        }
        let nonzero = [
            ("nsteps", self.nsteps),
            ("print_every", self.print_every),
            ("parallel_images", self.parallel_images),
            ("procs_per_image", self.procs_per_image),
        ];
        for (name, v) in nonzero {
            if v == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be at least 1"
                )));
            }
        }
        if self.calculator.command.is_empty() {
            return Err(ConfigError::Invalid(
                "calculator command is empty".to_owned(),
            ));
        }
        if self.states.len() != self.geometries.len() {
            return Err(ConfigError::Invalid(format!(
                "{} states given for {} geometries",
                self.states.len(),
                self.geometries.len()
            )));
        }
        Ok(())
    }

    pub fn integrator(&self) -> Integrator {
        match self.integrator {
            IntegratorKind::Verlet => Integrator::Verlet {
                dt: self.dt,
                friction: self.friction,
                mass: self.mass,
            },
            IntegratorKind::Bfgs => Integrator::Bfgs {
                max_step: self.max_step,
            },
        }
    }

    pub fn springs(&self) -> Springs {
        Springs::new(self.force_constant, self.force_constant_switch)
    }

    pub fn resources(&self) -> Resources {
        Resources {
            nprocs: self.procs_per_image,
            mem: self.mem_per_image.clone(),
        }
    }

    pub fn scratch(&self) -> PathBuf {
        PathBuf::from(&self.scratch_dir)
    }

    /// the initial chain with `interpolate` images added to every segment
    pub fn chain(&self) -> Result<Chain, NebError> {
        let chain =
            Chain::new(&self.geometries, &self.states, self.integrator())?;
        Ok(if self.interpolate > 0 {
            chain.interpolate(self.interpolate)
        } else {
            chain
        })
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Config {
            geometries,
            states,
            interpolate,
            name,
            force_constant,
            force_constant_switch,
            mass,
            tolerance,
            nsteps,
            dt,
            friction,
            max_step,
            optimize_endpoints,
            print_every,
            integrator,
            procs_per_image,
            mem_per_image,
            parallel_images,
            scratch_dir,
            on_failure,
            calculator,
        } = self;
        let on_failure = match on_failure {
            OnFailure::Abort => "abort",
            OnFailure::Quarantine => "quarantine",
        };
        writeln!(f, "\nConfiguration Options:")?;
        writeln!(
            f,
            "path = {} geometries of {} atoms",
            geometries.len(),
            geometries.first().map_or(0, Geom::len)
        )?;
        writeln!(f, "states = {states:?}")?;
        writeln!(f, "interpolate = {interpolate}")?;
        writeln!(f, "name = {name}")?;
        writeln!(f, "force_constant = {force_constant}")?;
        writeln!(f, "force_constant_switch = {force_constant_switch}")?;
        writeln!(f, "mass = {mass}")?;
        writeln!(f, "tolerance = {tolerance}")?;
        writeln!(f, "nsteps = {nsteps}")?;
        writeln!(f, "dt = {dt}")?;
        writeln!(f, "friction = {friction}")?;
        writeln!(f, "max_step = {max_step}")?;
        writeln!(f, "optimize_endpoints = {optimize_endpoints}")?;
        writeln!(f, "print_every = {print_every}")?;
        writeln!(f, "integrator = {integrator}")?;
        writeln!(f, "procs_per_image = {procs_per_image}")?;
        writeln!(f, "mem_per_image = {mem_per_image}")?;
        writeln!(f, "parallel_images = {parallel_images}")?;
        writeln!(f, "scratch_dir = {scratch_dir}")?;
        writeln!(f, "on_failure = {on_failure}")?;
        writeln!(f, "calculator.command = {:?}", calculator.command)?;
        writeln!(f, "calculator.input = {}", calculator.input)?;
        writeln!(f, "calculator.output = {}", calculator.output)?;
        match &calculator.template {
            Some(t) => writeln!(f, "calculator.template = {{\n{t}\n}}"),
            None => writeln!(f, "calculator.template = none"),
        }
    }
}
