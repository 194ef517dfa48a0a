//! Launch templates.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use cutover_core::config::LaunchConfig;

const ARTIFACT: &str = "{artifact}";
const PORT: &str = "{port}";

/// How to turn an artifact path and a port into a command line.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Program name after substitution, for error messages.
    pub fn program_for(&self, artifact: &Path, port: u16) -> String {
        substitute(&self.program, artifact, port)
    }

    /// Build the command. Output handles and stdin are left to the caller
    /// except that stdin is detached.
    pub(crate) fn command(&self, artifact: &Path, port: u16) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(self.program_for(artifact, port));
        cmd.args(self.args.iter().map(|a| substitute(a, artifact, port)))
            .envs(&self.env)
            .env("PORT", port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(false);
        cmd
    }
}

impl From<&LaunchConfig> for LaunchSpec {
    fn from(config: &LaunchConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
        }
    }
}

fn substitute(template: &str, artifact: &Path, port: u16) -> String {
    template
        .replace(ARTIFACT, &artifact.to_string_lossy())
        .replace(PORT, &port.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_placeholders() {
        let spec = LaunchSpec::from(&LaunchConfig::default());
        let cmd = spec.command(Path::new("/srv/app-v2.jar"), 8081);
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "java");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-jar", "/srv/app-v2.jar", "--server.port=8081"]);
    }

    #[test]
    fn program_may_be_the_artifact() {
        let spec = LaunchSpec::new(ARTIFACT, vec!["--port".to_string(), PORT.to_string()]);
        assert_eq!(spec.program_for(Path::new("./bin/server"), 9000), "./bin/server");
    }

    #[test]
    fn port_env_is_always_set() {
        let spec = LaunchSpec::new("sh", vec![]).with_env("MODE", "blue");
        let cmd = spec.command(Path::new("x"), 8123);
        let envs: HashMap<_, _> = cmd
            .as_std()
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_string_lossy().into_owned(), v?.to_string_lossy().into_owned())))
            .collect();
        assert_eq!(envs["PORT"], "8123");
        assert_eq!(envs["MODE"], "blue");
    }
}
