use pes::Atom;
use test_case::test_case;

use super::*;

const PATH: &str = "
2
reactant
H 0.0 0.0 0.0
H 0.0 0.0 0.74
2
product
H 0.0 0.0 0.0
H 0.0 0.0 1.50
";

fn h2(z: f64) -> Geom {
    Geom::from(vec![Atom::new(1, 0.0, 0.0, 0.0), Atom::new(1, 0.0, 0.0, z)])
}

fn minimal(extra: &str) -> String {
    format!(
        "path = \"\"\"{PATH}\"\"\"
{extra}

[calculator]
command = \"./run.sh\"
"
    )
}

#[test]
fn config() {
    let got = Config::from_toml(&format!(
        r#"
path = """{PATH}"""
states = [0, 1]
interpolate = 3
name = "h2"
force_constant = 2.0
force_constant_switch = 10.0
mass = 2.0
tolerance = 0.001
nsteps = 50
dt = 0.05
friction = 0.1
max_step = 0.1
optimize_endpoints = true
print_every = 5
integrator = "bfgs"
procs_per_image = 4
mem_per_image = "2Gb"
parallel_images = 3
scratch_dir = "/tmp/neb"
on_failure = "quarantine"

[calculator]
command = ["python3", "run.py"]
input = "job.com"
output = "job.out"
template = "{{{{.geom}}}} {{{{.nprocs}}}}"
"#
    ))
    .unwrap();
    let want = Config {
        geometries: vec![h2(0.74), h2(1.5)],
        states: vec![0, 1],
        interpolate: 3,
        name: "h2".to_owned(),
        force_constant: 2.0,
        force_constant_switch: 10.0,
        mass: 2.0,
        tolerance: 0.001,
        nsteps: 50,
        dt: 0.05,
        friction: 0.1,
        max_step: 0.1,
        optimize_endpoints: true,
        print_every: 5,
        integrator: IntegratorKind::Bfgs,
        procs_per_image: 4,
        mem_per_image: "2Gb".to_owned(),
        parallel_images: 3,
        scratch_dir: "/tmp/neb".to_owned(),
        on_failure: OnFailure::Quarantine,
        calculator: CalculatorConfig {
            command: vec!["python3".to_owned(), "run.py".to_owned()],
            input: "job.com".to_owned(),
            output: "job.out".to_owned(),
            template: Some("{{.geom}} {{.nprocs}}".to_owned()),
        },
    };
    assert_eq!(got, want);
    assert_eq!(got.integrator(), Integrator::Bfgs { max_step: 0.1 });
    assert_eq!(got.springs(), Springs::new(2.0, 10.0));
    assert_eq!(
        got.resources(),
        Resources {
            nprocs: 4,
            mem: "2Gb".to_owned()
        }
    );
}

#[test]
fn defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hydrogen.xyz");
    std::fs::write(&path, PATH).unwrap();
    let got = Config::from_toml(&format!(
        "path = {{ file = {:?} }}

[calculator]
command = \"g16 --fast\"
",
        path.display().to_string()
    ))
    .unwrap();
    assert_eq!(got.geometries, vec![h2(0.74), h2(1.5)]);
    assert_eq!(got.name, "hydrogen");
    assert_eq!(got.states, vec![0, 0]);
    assert_eq!(got.interpolate, 0);
    assert_eq!(got.force_constant, 1.0);
    assert_eq!(got.force_constant_switch, 5.0);
    assert_eq!(got.tolerance, 0.02);
    assert_eq!(got.nsteps, 1000);
    assert_eq!(
        got.integrator(),
        Integrator::Verlet {
            dt: 0.1,
            friction: 0.2,
            mass: 1.0
        }
    );
    assert!(!got.optimize_endpoints);
    assert_eq!(got.print_every, 1);
    assert_eq!(got.resources(), Resources::default());
    assert_eq!(got.parallel_images, 1);
    assert_eq!(got.scratch(), PathBuf::from("scratch"));
    assert_eq!(got.on_failure, OnFailure::Abort);
    assert_eq!(got.calculator.command, vec!["g16", "--fast"]);
    assert_eq!(got.calculator.input, "neb.inp");
    assert_eq!(got.calculator.output, "FORCE.out");
    assert_eq!(got.calculator.template, None);
}

#[test]
fn literal_path_name() {
    let got = Config::from_toml(&minimal("")).unwrap();
    assert_eq!(got.name, "path");
}

#[test_case("tolerance = 0.0" ; "zero tolerance")]
#[test_case("mass = -1.0" ; "negative mass")]
#[test_case("dt = 0.0" ; "zero dt")]
#[test_case("max_step = 0.0" ; "zero max step")]
#[test_case("friction = 1.0" ; "friction too high")]
#[test_case("friction = -0.1" ; "negative friction")]
#[test_case("nsteps = 0" ; "no steps")]
#[test_case("print_every = 0" ; "print every zero")]
#[test_case("parallel_images = 0" ; "no parallel images")]
#[test_case("states = [0, 0, 1]" ; "too many states")]
fn invalid(extra: &str) {
    let got = Config::from_toml(&minimal(extra));
    assert!(matches!(got, Err(ConfigError::Invalid(_))), "{got:?}");
}

#[test]
fn empty_command() {
    let got = Config::from_toml(&format!(
        "path = \"\"\"{PATH}\"\"\"

[calculator]
command = []
"
    ));
    assert!(matches!(got, Err(ConfigError::Invalid(_))));
}

#[test]
fn parse_errors() {
    let got = Config::from_toml(&minimal("bogus = 1"));
    assert!(matches!(got, Err(ConfigError::Parse(_))));

    let got = Config::from_toml(&minimal("integrator = \"sd\""));
    assert!(matches!(got, Err(ConfigError::Parse(_))));

    let got = Config::from_toml(
        "path = \"H 0 0\"\n[calculator]\ncommand = \"x\"\n",
    );
    assert!(matches!(got, Err(ConfigError::Geom(_))));

    let got = Config::load("/nonexistent/neb.toml");
    assert!(matches!(got, Err(ConfigError::Read(..))));
}

#[test]
fn env_vars() {
    let path = std::env::var("PATH").unwrap();
    assert_eq!(expand_vars("$PATH/neb").unwrap(), format!("{path}/neb"));
    assert_eq!(expand_vars("a${PATH}b").unwrap(), format!("a{path}b"));
    assert_eq!(expand_vars("plain/dir").unwrap(), "plain/dir");
    assert_eq!(
        expand_vars("$NEB_TEST_SURELY_UNSET/x"),
        Err(ConfigError::MissingVar("NEB_TEST_SURELY_UNSET".to_owned()))
    );
}

#[test]
fn chain() {
    let config = Config::from_toml(&minimal("interpolate = 2")).unwrap();
    let chain = config.chain().unwrap();
    assert_eq!(chain.len(), 4);
    assert_eq!(chain.geom(3), h2(1.5));
}

#[test]
fn display() {
    let config = Config::from_toml(&minimal("")).unwrap();
    let got = config.to_string();
    assert!(got.contains("path = 2 geometries of 2 atoms"));
    assert!(got.contains("integrator = verlet"));
    assert!(got.contains("on_failure = abort"));
}
