use std::process::Command;

use log::debug;

use crate::error::ProbeError;

/// Wireless interface mode control through `ifconfig` and `iw`.
pub struct WifiInterface {
    interface_name: String,
}

impl WifiInterface {
    pub fn new(interface_name: &str) -> Self {
        WifiInterface {
            interface_name: interface_name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.interface_name
    }

    pub fn set_monitor_mode(&self) -> Result<(), ProbeError> {
        self.set_type("monitor")?;

        if !self.is_monitor_mode()? {
            return Err(self.error(format!("failed to set {} to monitor mode", self.interface_name)));
        }
        Ok(())
    }

    pub fn set_managed_mode(&self) -> Result<(), ProbeError> {
        self.set_type("managed")
    }

    pub fn is_monitor_mode(&self) -> Result<bool, ProbeError> {
        let output = Command::new("iw")
            .arg(&self.interface_name)
            .arg("info")
            .output()
            .map_err(|e| self.error(format!("failed to execute iw command: {}", e)))?;

        let output_str = String::from_utf8_lossy(&output.stdout);
        Ok(output_str.contains("type monitor"))
    }

    /// Runs the configured hop command with `{interface}` and `{channel}`
    /// substituted.
    pub fn set_channel(&self, hop_command: &str, channel: u16) -> Result<(), ProbeError> {
        let command = hop_command
            .replace("{interface}", &self.interface_name)
            .replace("{channel}", &channel.to_string());

        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return Err(self.error("empty channel hop command".to_string()));
        };
        let args: Vec<&str> = parts.collect();

        debug!("Hopping [{}] to channel {}", self.interface_name, channel);
        self.execute_command_with_check(program, &args, "failed to set channel")
    }

    fn set_type(&self, mode: &str) -> Result<(), ProbeError> {
        self.execute_command_with_check("ifconfig", &[self.interface_name.as_str(), "down"], "failed to bring interface down")?;
        self.execute_command_with_check(
            "iw",
            &[self.interface_name.as_str(), "set", "type", mode],
            "failed to change interface type",
        )?;
        self.execute_command_with_check("ifconfig", &[self.interface_name.as_str(), "up"], "failed to bring interface up")
    }

    fn execute_command_with_check(&self, cmd: &str, args: &[&str], error_msg: &str) -> Result<(), ProbeError> {
        let output = Command::new(cmd)
            .args(args)
            .output()
            .map_err(|e| self.error(format!("{}: {}", error_msg, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.error(format!("{}: {}", error_msg, stderr.trim())));
        }

        Ok(())
    }

    fn error(&self, message: String) -> ProbeError {
        ProbeError::Interface {
            interface: self.interface_name.clone(),
            message,
        }
    }
}
