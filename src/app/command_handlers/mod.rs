use crate::app::cli::{help_text, parse_cli_verb, CliVerb};
use crate::app::command_support::{load_context, split_config_flag};

pub mod daemon;
pub mod jobs;
pub mod permissions;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    let (config, args) = split_config_flag(args)?;
    if args.is_empty() {
        return Ok(help_text());
    }

    let verb = parse_cli_verb(args[0].as_str());
    match verb {
        CliVerb::Help => return Ok(help_text()),
        CliVerb::Unknown => return Err(format!("unknown command `{}`", args[0])),
        CliVerb::Setup => return daemon::cmd_setup(config.as_deref()),
        _ => {}
    }

    let context = load_context(config.as_deref())?;
    let rest = &args[1..];
    match verb {
        CliVerb::Serve => daemon::cmd_serve(&context),
        CliVerb::Stop => daemon::cmd_stop(&context),
        CliVerb::Submit => jobs::cmd_submit(&context, rest),
        CliVerb::Status => match rest.first() {
            Some(key) => jobs::cmd_job_status(&context, key),
            None => daemon::cmd_status(&context),
        },
        CliVerb::Cancel => jobs::cmd_cancel(&context, rest),
        CliVerb::Queue => jobs::cmd_queue(&context),
        CliVerb::Permit => permissions::cmd_permit(&context, rest),
        CliVerb::Check => permissions::cmd_check(&context, rest),
        CliVerb::Setup | CliVerb::Help | CliVerb::Unknown => Ok(help_text()),
    }
}
