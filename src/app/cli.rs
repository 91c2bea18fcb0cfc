#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Setup,
    Serve,
    Stop,
    Submit,
    Status,
    Cancel,
    Queue,
    Permit,
    Check,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "setup" => CliVerb::Setup,
        "serve" => CliVerb::Serve,
        "stop" => CliVerb::Stop,
        "submit" => CliVerb::Submit,
        "status" => CliVerb::Status,
        "cancel" => CliVerb::Cancel,
        "queue" => CliVerb::Queue,
        "permit" => CliVerb::Permit,
        "check" => CliVerb::Check,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Usage: lemc [--config <path>] <command> [args]".to_string(),
        String::new(),
        "Commands:".to_string(),
        "  setup                                Write default settings and create the data tree"
            .to_string(),
        "  serve                                Run the scheduler and workers in the foreground"
            .to_string(),
        "  stop                                 Stop the running server".to_string(),
        "  submit <trigger.yaml>                Queue a recipe trigger".to_string(),
        "  status [job-key]                     Show server state, or one job's status"
            .to_string(),
        "  cancel <job-key>                     Cancel pending runs and signal an active run"
            .to_string(),
        "  queue                                List live and failed queue entries".to_string(),
        "  permit <user> <account> <capability> [uuid] [cookbook-uuid]".to_string(),
        "                                       Grant a capability".to_string(),
        "  check <user> <account> <cap[,cap...]> [uuid]".to_string(),
        "                                       Evaluate capabilities for a user".to_string(),
    ]
}

pub(crate) fn help_text() -> String {
    cli_help_lines().join("\n")
}
