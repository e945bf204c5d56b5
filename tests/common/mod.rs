//! Shared test infrastructure for integration tests.
//!
//! Each fixture is a throwaway project directory plus `sh` scripts standing
//! in for the layout generator and the mesh converter.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Converter stand-in: writes the output file unless the artifact name
/// contains `broken`, in which case it prints a geometry error and still
/// exits 0, the way the real converter does.
pub const CONVERTER_SCRIPT: &str = r#"
in="$1"
out="$3"
touch "$(dirname "$0")/converter-ran"
case "$(basename "$in")" in
  *broken*) echo "Error: self intersecting geometry in $in" ;;
  *) echo "solid" > "$out"; echo "wrote $out" ;;
esac
"#;

pub struct Project {
    pub temp: TempDir,
    pub project_dir: PathBuf,
}

impl Project {
    pub fn create() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let project_dir = temp.path().join("board");
        std::fs::create_dir_all(&project_dir).expect("create project dir");
        std::fs::write(project_dir.join("config.yaml"), "points: {}\n").expect("write config");
        Self { temp, project_dir }
    }

    pub fn out_dir(&self) -> PathBuf {
        self.project_dir.join("output")
    }

    pub fn cases_dir(&self) -> PathBuf {
        self.out_dir().join("cases")
    }

    pub fn stl_dir(&self) -> PathBuf {
        self.cases_dir().join("stl")
    }

    pub fn converter_ran(&self) -> bool {
        self.temp.path().join("converter-ran").exists()
    }

    /// Write a generator script that emits `cases` and ends with `last_line`.
    pub fn generator(&self, cases: &[&str], last_line: &str) -> String {
        let mut body = String::from("out=\"$2\"\nmkdir -p \"$out/cases\"\n");
        for case in cases {
            body.push_str(&format!("echo 'cube()' > \"$out/cases/{case}\"\n"));
        }
        body.push_str("echo \"args: $*\"\n");
        body.push_str(&format!("echo '{last_line}'\n"));
        let path = self.temp.path().join("generate.sh");
        std::fs::write(&path, body).expect("write generator");
        sh_command(&path)
    }

    pub fn converter(&self) -> String {
        let path = self.temp.path().join("convert.sh");
        std::fs::write(&path, CONVERTER_SCRIPT).expect("write converter");
        sh_command(&path)
    }

    pub fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_kbd-build"));
        command
            .args(args)
            .env_remove("KBD_BUILD_GENERATOR")
            .env_remove("KBD_BUILD_CONVERTER")
            .env_remove("KBD_BUILD_JOB_TIMEOUT")
            .env("RUST_LOG", "kbd_build=info");
        command
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("run kbd-build")
    }
}

fn sh_command(script: &Path) -> String {
    shell_words::join(["sh".to_string(), script.display().to_string()])
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
