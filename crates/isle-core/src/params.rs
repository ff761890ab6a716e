//! Argument assembly for `jail -c`.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Network mode of a started jail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ip4Mode {
    /// `ip4=disable`
    Disabled,
    /// A leased address bound to a host interface.
    Leased {
        /// Host interface the address is aliased on.
        interface: String,
        /// The leased address.
        address: Ipv4Addr,
    },
}

/// Parameters for creating and running a jail in one step.
#[derive(Debug, Clone)]
pub struct JailParams {
    name: String,
    path: PathBuf,
    hostname: String,
    children_max: Option<u32>,
    mount_devfs: bool,
    exec_timeout: Option<Duration>,
    ip4: Ip4Mode,
    command: String,
    args: Vec<String>,
}

impl JailParams {
    /// Start building parameters for a jail named `name` rooted at `path`.
    pub fn builder(name: impl Into<String>, path: impl AsRef<Path>) -> JailParamsBuilder {
        let name = name.into();
        JailParamsBuilder {
            params: JailParams {
                hostname: name.clone(),
                name,
                path: path.as_ref().to_path_buf(),
                children_max: None,
                mount_devfs: true,
                exec_timeout: None,
                ip4: Ip4Mode::Disabled,
                command: String::new(),
                args: Vec::new(),
            },
        }
    }

    /// Jail name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Network mode.
    pub fn ip4(&self) -> &Ip4Mode {
        &self.ip4
    }

    /// Arguments for `jail`, ending with the command and its arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut out = vec![
            "-c".to_string(),
            "-n".to_string(),
            self.name.clone(),
        ];
        if let Some(max) = self.children_max {
            out.push(format!("children.max={max}"));
        }
        match &self.ip4 {
            Ip4Mode::Disabled => out.push("ip4=disable".into()),
            Ip4Mode::Leased { .. } => {}
        }
        out.push(format!("path={}", self.path.display()));
        out.push(format!("host.hostname={}", self.hostname));
        if self.mount_devfs {
            out.push("mount.devfs".into());
        }
        if let Ip4Mode::Leased { interface, address } = &self.ip4 {
            out.push(format!("interface={interface}"));
            out.push("ip4=new".into());
            out.push(format!("ip4.addr={address}"));
        }
        if let Some(timeout) = self.exec_timeout {
            out.push(format!("exec.timeout={}", timeout.as_secs().max(1)));
        }

        // jail(8) takes the words after command= as its arguments
        out.push(format!("command={}", self.command));
        out.extend(self.args.iter().cloned());
        out
    }
}

/// Builder for [`JailParams`].
#[derive(Debug, Clone)]
pub struct JailParamsBuilder {
    params: JailParams,
}

impl JailParamsBuilder {
    /// Override the hostname (defaults to the jail name).
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.params.hostname = hostname.into();
        self
    }

    /// Limit the number of child jails.
    pub fn children_max(mut self, max: u32) -> Self {
        self.params.children_max = Some(max);
        self
    }

    /// Mount devfs inside the jail (on by default).
    pub fn mount_devfs(mut self, enabled: bool) -> Self {
        self.params.mount_devfs = enabled;
        self
    }

    /// Kill the command after `timeout`.
    pub fn exec_timeout(mut self, timeout: Duration) -> Self {
        self.params.exec_timeout = Some(timeout);
        self
    }

    /// Set the network mode.
    pub fn ip4(mut self, mode: Ip4Mode) -> Self {
        self.params.ip4 = mode;
        self
    }

    /// Command to run inside the jail.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.params.command = command.into();
        self
    }

    /// Append an argument to the command.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.params.args.push(arg.into());
        self
    }

    /// Finish building.
    pub fn build(self) -> JailParams {
        self.params
    }
}
