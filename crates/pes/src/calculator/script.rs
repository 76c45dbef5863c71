use std::{
    fs::File,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::{CalcError, CalcResult, Calculator, Resources};
use crate::geom::Geom;

/// the geometry file written into the working directory before every run
pub const GEOM_FILE: &str = "geometry.xyz";

/// captured stdout and stderr of the program
pub const LOG_FILE: &str = "calc.log";

/// A calculator that runs an external command in the image's working
/// directory.
///
/// Before each run, the current geometry is written to [GEOM_FILE] and, if a
/// template is present, the template is rendered into `input` with the
/// `{{.geom}}`, `{{.nprocs}}`, and `{{.mem}}` directives expanded. The command
/// is then invoked as
///
/// ```text
/// command... <input> <nprocs> <mem>
/// ```
///
/// and must leave `output` behind in the directory: the energy on the first
/// line, one ignored line, and then one `label gx gy gz` line per atom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub command: Vec<String>,
    pub input: String,
    pub output: String,
    pub template: Option<String>,
}

impl Script {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            input: "neb.inp".to_owned(),
            output: "FORCE.out".to_owned(),
            template: None,
        }
    }

    pub fn input(mut self, input: &str) -> Self {
        self.input = input.to_owned();
        self
    }

    pub fn output(mut self, output: &str) -> Self {
        self.output = output.to_owned();
        self
    }

    pub fn template(mut self, template: Option<String>) -> Self {
        self.template = template;
        self
    }

    /// expand the template directives for `geom` and `res`
    pub fn render(&self, geom: &Geom, res: &Resources) -> Option<String> {
        self.template.as_ref().map(|t| {
            t.replace("{{.geom}}", geom.to_string().trim_end())
                .replace("{{.nprocs}}", &res.nprocs.to_string())
                .replace("{{.mem}}", &res.mem)
        })
    }

    /// write the geometry and the rendered template into `dir`, creating it
    /// if needed. any output left from an earlier run in `dir` is removed so
    /// it cannot be mistaken for the result of this one
    fn write_input(
        &self,
        geom: &Geom,
        dir: &Path,
        res: &Resources,
    ) -> Result<(), CalcError> {
        let io_err =
            |e: std::io::Error| CalcError::Io(dir.display().to_string(), e.kind());
        std::fs::create_dir_all(dir).map_err(io_err)?;
        match std::fs::remove_file(dir.join(&self.output)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(io_err(e));
            }
            _ => {}
        }
        let mut f = File::create(dir.join(GEOM_FILE)).map_err(io_err)?;
        geom.write_xyz(&mut f, "geometry", None).map_err(io_err)?;
        if let Some(body) = self.render(geom, res) {
            std::fs::write(dir.join(&self.input), body).map_err(io_err)?;
        }
        Ok(())
    }

    /// relative program paths with a directory component are taken relative
    /// to the current directory, not the working directory of the image
    fn program(&self) -> Result<PathBuf, CalcError> {
        let Some(prog) = self.command.first() else {
            return Err(CalcError::Spawn(
                String::new(),
                std::io::ErrorKind::InvalidInput,
            ));
        };
        let path = PathBuf::from(prog);
        if path.is_relative() && prog.contains('/') {
            let cwd = std::env::current_dir().map_err(|e| {
                CalcError::Spawn(prog.clone(), e.kind())
            })?;
            return Ok(cwd.join(path));
        }
        Ok(path)
    }

    fn run(&self, dir: &Path, res: &Resources) -> Result<(), CalcError> {
        let io_err =
            |e: std::io::Error| CalcError::Io(dir.display().to_string(), e.kind());
        let log = File::create(dir.join(LOG_FILE)).map_err(io_err)?;
        let err = log.try_clone().map_err(io_err)?;
        let now = std::time::Instant::now();
        let status = Command::new(self.program()?)
            .args(&self.command[1..])
            .arg(&self.input)
            .arg(res.nprocs.to_string())
            .arg(&res.mem)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err))
            .status()
            .map_err(|e| CalcError::Spawn(self.command.join(" "), e.kind()))?;
        log::trace!(
            "{} finished in {:.1} s",
            dir.display(),
            now.elapsed().as_secs_f64()
        );
        if !status.success() {
            return Err(CalcError::Exit(
                dir.display().to_string(),
                status.code(),
            ));
        }
        Ok(())
    }
}

/// read the energy and gradient for `natoms` atoms from `path`
pub fn read_output(path: &Path, natoms: usize) -> Result<CalcResult, CalcError> {
    let name = path.display().to_string();
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Err(CalcError::OutputNotFound(name));
    };
    let mut lines = contents.lines();
    let energy = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| CalcError::EnergyParse(name.clone()))?;
    // separator line
    lines.next();
    let mut gradient = Vec::with_capacity(3 * natoms);
    for line in lines.filter(|l| !l.trim().is_empty()) {
        let fields: Vec<_> = line.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(CalcError::GradientParse(name, line.to_owned()));
        }
        for f in &fields[1..] {
            let Ok(g) = f.parse::<f64>() else {
                return Err(CalcError::GradientParse(name, line.to_owned()));
            };
            gradient.push(g);
        }
    }
    if gradient.len() != 3 * natoms {
        return Err(CalcError::WrongSize {
            want: 3 * natoms,
            got: gradient.len(),
        });
    }
    Ok(CalcResult {
        energy,
        gradient: DVector::from_vec(gradient),
    })
}

impl Calculator for Script {
    fn evaluate(
        &self,
        geom: &Geom,
        dir: &Path,
        res: &Resources,
    ) -> Result<CalcResult, CalcError> {
        self.write_input(geom, dir, res)?;
        self.run(dir, res)?;
        read_output(&dir.join(&self.output), geom.len())
    }
}
