//! Supervisor program construction and config rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::Utc;
use fleet_core::{SupervisorProgramId, WebAppId};
use fleet_store::{PackageManager, ProgramStatus, SupervisorProgram, WebApp};

use crate::error::{ControlError, Result};
use crate::types::SupervisorSettings;

/// Prefix of every program created for a Node.js web app.
pub const NODE_PROGRAM_PREFIX: &str = "nodejs-";

/// Name of the program running a single-process Node.js app.
#[must_use]
pub fn node_program_name(webapp_id: &WebAppId) -> String {
    format!("{NODE_PROGRAM_PREFIX}{webapp_id}")
}

/// Name of the program running one process of a monorepo app.
#[must_use]
pub fn monorepo_program_name(webapp_id: &WebAppId, process: &str) -> String {
    format!("{NODE_PROGRAM_PREFIX}{webapp_id}-{process}")
}

/// The command starting a Node.js app.
///
/// - empty or absent: `<pm> start`
/// - already invoking the package manager (`npm ...`) or `node ...`: unchanged
/// - anything else is taken as a script name: `<pm> run <script>`
#[must_use]
pub fn build_node_command(package_manager: PackageManager, start_command: Option<&str>) -> String {
    let pm = package_manager.as_str();
    let command = start_command.map_or("", str::trim);

    if command.is_empty() {
        return format!("{pm} start");
    }
    if command
        .strip_prefix(pm)
        .is_some_and(|rest| rest.starts_with(' '))
        || command.starts_with("node ")
    {
        return command.to_string();
    }
    format!("{pm} run {command}")
}

/// [`build_node_command`] for a stored app.
#[must_use]
pub fn node_command_for(app: &WebApp) -> String {
    build_node_command(app.package_manager, app.start_command.as_deref())
}

/// Renders supervisor config blocks and builds program records.
#[derive(Debug, Clone)]
pub struct SupervisorConfigBuilder {
    settings: SupervisorSettings,
}

impl SupervisorConfigBuilder {
    /// Create a builder with the given defaults.
    #[must_use]
    pub const fn new(settings: SupervisorSettings) -> Self {
        Self { settings }
    }

    /// A pending program for a web app process, running as the app's user in
    /// its directory with `NODE_ENV=production` and `PORT=<port>`.
    #[must_use]
    pub fn node_program(
        &self,
        app: &WebApp,
        name: String,
        command: String,
        port: Option<u16>,
    ) -> SupervisorProgram {
        let mut environment = BTreeMap::new();
        environment.insert("NODE_ENV".to_string(), "production".to_string());
        if let Some(port) = port {
            environment.insert("PORT".to_string(), port.to_string());
        }

        let now = Utc::now();
        SupervisorProgram {
            program_id: SupervisorProgramId::generate(),
            server_id: app.server_id,
            webapp_id: Some(app.webapp_id),
            name,
            command,
            directory: app.directory.clone(),
            user: app.system_user.clone(),
            numprocs: 1,
            autostart: true,
            autorestart: true,
            startsecs: self.settings.startsecs,
            stopwaitsecs: self.settings.stopwaitsecs,
            environment,
            status: ProgramStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Default `startsecs` for new programs.
    #[must_use]
    pub const fn startsecs(&self) -> u32 {
        self.settings.startsecs
    }

    /// Default `stopwaitsecs` for new programs.
    #[must_use]
    pub const fn stopwaitsecs(&self) -> u32 {
        self.settings.stopwaitsecs
    }

    /// Render the `[program:<name>]` block for a program.
    ///
    /// Every field lands on one line of the block, so a field carrying a line
    /// break or other control character is refused rather than rendered.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidArgument` naming the offending field.
    pub fn generate_config(&self, program: &SupervisorProgram) -> Result<String> {
        check_line("name", &program.name)?;
        check_line("command", &program.command)?;
        check_line("directory", &program.directory)?;
        check_line("user", &program.user)?;
        for (key, value) in &program.environment {
            check_line("environment key", key)?;
            check_line(key, value)?;
        }

        let process_name = if program.numprocs > 1 {
            "%(program_name)s_%(process_num)02d"
        } else {
            "%(program_name)s"
        };

        let mut config = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(config, "[program:{}]", program.name);
        let _ = writeln!(config, "process_name={process_name}");
        let _ = writeln!(config, "command={}", program.command);
        let _ = writeln!(config, "directory={}", program.directory);
        let _ = writeln!(config, "user={}", program.user);
        let _ = writeln!(config, "numprocs={}", program.numprocs);
        let _ = writeln!(config, "autostart={}", program.autostart);
        let _ = writeln!(config, "autorestart={}", program.autorestart);
        let _ = writeln!(config, "startsecs={}", program.startsecs);
        let _ = writeln!(config, "stopwaitsecs={}", program.stopwaitsecs);
        config.push_str("stopasgroup=true\n");
        config.push_str("killasgroup=true\n");
        config.push_str("redirect_stderr=true\n");
        let _ = writeln!(
            config,
            "stdout_logfile={}/{}.log",
            self.settings.log_dir.trim_end_matches('/'),
            program.name
        );

        if !program.environment.is_empty() {
            config.push_str("environment=\n");
            let last = program.environment.len() - 1;
            for (i, (key, value)) in program.environment.iter().enumerate() {
                let separator = if i == last { "" } else { "," };
                let _ = writeln!(config, "    {key}=\"{}\"{separator}", escape_value(value));
            }
        }

        Ok(config)
    }
}

impl Default for SupervisorConfigBuilder {
    fn default() -> Self {
        Self::new(SupervisorSettings::default())
    }
}

fn check_line(field: &str, value: &str) -> Result<()> {
    if value.contains(char::is_control) {
        return Err(ControlError::InvalidArgument(format!(
            "supervisor {field} must be a single line without control characters"
        )));
    }
    Ok(())
}

/// Quote-escape an environment value; `%` is doubled since supervisor
/// expands `%(name)s` references.
fn escape_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('%', "%%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::ServerId;
    use fleet_store::{AppType, DeployStatus, ResourceStatus};

    fn test_app() -> WebApp {
        let now = Utc::now();
        WebApp {
            webapp_id: WebAppId::from_bytes([9u8; 16]),
            server_id: ServerId::generate(),
            domain: "api.example.com".into(),
            app_type: AppType::Nodejs,
            status: ResourceStatus::Pending,
            error_message: None,
            directory: "/home/deploy/api.example.com".into(),
            system_user: "deploy".into(),
            node_port: Some(3005),
            node_processes: Vec::new(),
            package_manager: PackageManager::Npm,
            start_command: None,
            supervisor_program_id: None,
            deploy_status: DeployStatus::NeverDeployed,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn node_command_rules() {
        use PackageManager::{Npm, Pnpm, Yarn};

        assert_eq!(build_node_command(Npm, Some("npm run production")), "npm run production");
        assert_eq!(build_node_command(Npm, Some("node dist/main.js")), "node dist/main.js");
        assert_eq!(build_node_command(Pnpm, Some("start:prod")), "pnpm run start:prod");
        assert_eq!(build_node_command(Yarn, None), "yarn start");
        assert_eq!(build_node_command(Npm, Some("   ")), "npm start");
        assert_eq!(build_node_command(Yarn, Some("  yarn serve ")), "yarn serve");
    }

    #[test]
    fn node_command_only_recognizes_own_package_manager() {
        assert_eq!(
            build_node_command(PackageManager::Pnpm, Some("npm start")),
            "pnpm run npm start"
        );
        // `npmx` is not an npm invocation
        assert_eq!(
            build_node_command(PackageManager::Npm, Some("npmx")),
            "npm run npmx"
        );
    }

    #[test]
    fn node_program_environment() {
        let builder = SupervisorConfigBuilder::default();
        let app = test_app();
        let program = builder.node_program(
            &app,
            node_program_name(&app.webapp_id),
            node_command_for(&app),
            app.node_port,
        );

        assert_eq!(program.name, format!("nodejs-{}", app.webapp_id));
        assert_eq!(program.command, "npm start");
        assert_eq!(program.environment["NODE_ENV"], "production");
        assert_eq!(program.environment["PORT"], "3005");
        assert_eq!(program.user, "deploy");
        assert_eq!(program.status, ProgramStatus::Pending);
    }

    #[test]
    fn generated_config_layout() {
        let builder = SupervisorConfigBuilder::default();
        let app = test_app();
        let program = builder.node_program(&app, "nodejs-api".into(), "npm start".into(), Some(3005));

        let expected = "\
[program:nodejs-api]
process_name=%(program_name)s
command=npm start
directory=/home/deploy/api.example.com
user=deploy
numprocs=1
autostart=true
autorestart=true
startsecs=1
stopwaitsecs=10
stopasgroup=true
killasgroup=true
redirect_stderr=true
stdout_logfile=/var/log/supervisor/nodejs-api.log
environment=
    NODE_ENV=\"production\",
    PORT=\"3005\"
";
        assert_eq!(builder.generate_config(&program).unwrap(), expected);
    }

    #[test]
    fn multi_process_naming_and_escaping() {
        let builder = SupervisorConfigBuilder::default();
        let mut program =
            builder.node_program(&test_app(), "worker".into(), "node worker.js".into(), None);
        program.numprocs = 4;
        program
            .environment
            .insert("GREETING".into(), "say \"hi\" 100%".into());

        let config = builder.generate_config(&program).unwrap();
        assert!(config.contains("process_name=%(program_name)s_%(process_num)02d\n"));
        assert!(config.contains("    GREETING=\"say \\\"hi\\\" 100%%\",\n"));
        assert!(config.ends_with("    NODE_ENV=\"production\"\n"));
    }

    #[test]
    fn no_environment_line_when_empty() {
        let builder = SupervisorConfigBuilder::default();
        let mut program = builder.node_program(&test_app(), "w".into(), "node w.js".into(), None);
        program.environment.clear();

        assert!(!builder
            .generate_config(&program)
            .unwrap()
            .contains("environment="));
    }

    #[test]
    fn multi_line_fields_are_refused() {
        let builder = SupervisorConfigBuilder::default();
        let app = test_app();
        let injected = build_node_command(
            PackageManager::Npm,
            Some("serve\n[program:evil]\ncommand=/bin/sh -c id"),
        );
        let program = builder.node_program(&app, "nodejs-api".into(), injected, Some(3005));
        assert!(matches!(
            builder.generate_config(&program),
            Err(ControlError::InvalidArgument(_))
        ));

        let mut program =
            builder.node_program(&app, "nodejs-api".into(), "npm start".into(), Some(3005));
        program.directory = "/srv/app\r".into();
        assert!(builder.generate_config(&program).is_err());

        let mut program =
            builder.node_program(&app, "nodejs-api".into(), "npm start".into(), Some(3005));
        program
            .environment
            .insert("TOKEN".into(), "a\n[program:x]".into());
        assert!(builder.generate_config(&program).is_err());
    }
}
