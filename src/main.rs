use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches, Command};
use itertools::Itertools;

use account_lifecycle::auth::password::read_password;
use account_lifecycle::auth::{
    validate_password, Account, AccountLifecycle, ExpiryPolicy, Outcome, TokenPurpose,
};
use account_lifecycle::ratelimit::RateLimiter;
use account_lifecycle::utils::io::is_valid_email;
use account_lifecycle::utils::logging::initialize_logging;
use account_lifecycle::utils::time::{
    format_duration, format_optional, format_timestamp, Clock, SystemClock,
};
use account_lifecycle::{CoreConfig, Error, JsonFileStore, CONFIG_FILE, LOG_FILE, STORE_FILE};

fn cli() -> Command {
    let email = || Arg::new("email").help("Email address of the account").required(true);
    let password = || {
        Arg::new("password")
            .long("password")
            .help("Password (prompted for when omitted)")
            .value_name("PASSWORD")
    };

    Command::new("account-lifecycle")
        .about("Account activation, password reset and rate limiting administration")
        .arg(
            Arg::new("store")
                .long("store")
                .help("Path of the JSON account store")
                .value_name("FILE")
                .default_value(STORE_FILE)
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path of the JSON configuration file")
                .value_name("FILE")
                .default_value(CONFIG_FILE)
                .global(true),
        )
        .subcommand(Command::new("register").about("Register a new account").arg(email()))
        .subcommand(
            Command::new("list").about("List all accounts").arg(
                Arg::new("sort")
                    .long("sort")
                    .help("Sort accounts by id, email or status")
                    .value_name("SORT")
                    .value_parser(["id", "email", "status"]),
            ),
        )
        .subcommand(Command::new("status").about("Show the state of an account").arg(email()))
        .subcommand(
            Command::new("request-activation")
                .about("Issue an activation token")
                .arg(email()),
        )
        .subcommand(
            Command::new("activate")
                .about("Activate an account with its token and set the first password")
                .arg(email())
                .arg(Arg::new("token").help("Activation token").required(true))
                .arg(password()),
        )
        .subcommand(Command::new("deactivate").about("Deactivate an account").arg(email()))
        .subcommand(Command::new("block").about("Block an account").arg(email()))
        .subcommand(Command::new("unblock").about("Unblock an account").arg(email()))
        .subcommand(
            Command::new("request-reset")
                .about("Issue a password reset token")
                .arg(email()),
        )
        .subcommand(
            Command::new("reset-password")
                .about("Set a new password with a reset token")
                .arg(email())
                .arg(Arg::new("token").help("Password reset token").required(true))
                .arg(password()),
        )
        .subcommand(
            Command::new("revoke-password")
                .about("Remove the password so the account must go through a reset")
                .arg(email()),
        )
        .subcommand(Command::new("login").about("Check credentials").arg(email()).arg(password()))
        .subcommand(
            Command::new("tokens").about("List live tokens").arg(
                Arg::new("verbose")
                    .long("verbose")
                    .short('v')
                    .help("Include creation times")
                    .action(ArgAction::SetTrue),
            ),
        )
        .subcommand(Command::new("purge-tokens").about("Remove expired tokens"))
        .subcommand(
            Command::new("rate-check")
                .about("Count one request against the rate limiter")
                .arg(Arg::new("client").help("Client key, e.g. an IP address").required(true))
                .arg(Arg::new("route").help("Route key").default_value("/")),
        )
}

fn main() {
    if let Err(e) = initialize_logging(Path::new(LOG_FILE)) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli().get_matches()) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(matches: ArgMatches) -> Result<(), Error> {
    let config = CoreConfig::load(Path::new(value(&matches, "config")))?;
    let store = Arc::new(JsonFileStore::new(value(&matches, "store")));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lifecycle = AccountLifecycle::from_config(&config, store.clone(), clock.clone())?;

    match matches.subcommand() {
        Some(("register", sub)) => {
            let email = value(sub, "email");
            if !is_valid_email(email.trim()) {
                println!("Invalid email address: {}", email);
                return Ok(());
            }
            let account = lifecycle.register(email)?;
            println!("Registered {} with id {}", account.email, account.id);
        }
        Some(("list", sub)) => {
            let accounts = lifecycle.accounts()?;
            if accounts.is_empty() {
                println!("No accounts registered.");
                return Ok(());
            }

            let sort = sub.get_one::<String>("sort").map(String::as_str);
            let sorted = accounts
                .iter()
                .sorted_by(|a, b| match sort {
                    Some("email") => a.email.cmp(&b.email),
                    Some("status") => (a.blocked, a.active).cmp(&(b.blocked, b.active)),
                    _ => a.id.cmp(&b.id),
                })
                .collect::<Vec<_>>();

            for account in sorted {
                println!(
                    "{:>4}  {:<32} {:<11} {:<9} {}",
                    account.id,
                    account.email,
                    account.active_status().to_string(),
                    account.blocked_status().to_string(),
                    account.password_status()
                );
            }
        }
        Some(("status", sub)) => {
            if let Some(account) = find(&lifecycle, sub)? {
                print_status(&account, &lifecycle);
            }
        }
        Some(("request-activation", sub)) => {
            if let Some(account) = find(&lifecycle, sub)? {
                match lifecycle.request_activation(account.id)? {
                    Outcome::Applied(token) => println!(
                        "Activation token for {}: {}\nValid until {}",
                        account.email,
                        token.value,
                        format_timestamp(&token.expires_at)
                    ),
                    outcome => report("Activation request", &account.email, outcome),
                }
            }
        }
        Some(("activate", sub)) => {
            if let Some(account) = find(&lifecycle, sub)? {
                let password = new_password(sub)?;
                let outcome = lifecycle.activate(
                    account.id,
                    value(sub, "token"),
                    &password,
                    lifecycle.activation_ttl_hours(),
                )?;
                report("Activated", &account.email, outcome);
            }
        }
        Some(("deactivate", sub)) => {
            if let Some(account) = find(&lifecycle, sub)? {
                report("Deactivated", &account.email, lifecycle.deactivate(account.id)?);
            }
        }
        Some(("block", sub)) => {
            if let Some(account) = find(&lifecycle, sub)? {
                report("Blocked", &account.email, lifecycle.block(account.id)?);
            }
        }
        Some(("unblock", sub)) => {
            if let Some(account) = find(&lifecycle, sub)? {
                report("Unblocked", &account.email, lifecycle.unblock(account.id)?);
            }
        }
        Some(("request-reset", sub)) => {
            if let Some(account) = find(&lifecycle, sub)? {
                match lifecycle.request_password_reset(account.id)? {
                    Outcome::Applied(token) => println!(
                        "Password reset token for {}: {}\nValid until {}",
                        account.email,
                        token.value,
                        format_timestamp(&token.expires_at)
                    ),
                    outcome => report("Password reset request", &account.email, outcome),
                }
            }
        }
        Some(("reset-password", sub)) => {
            if let Some(account) = find(&lifecycle, sub)? {
                let password = new_password(sub)?;
                let outcome = lifecycle.reset_password(
                    account.id,
                    value(sub, "token"),
                    value(sub, "email"),
                    &password,
                    lifecycle.password_reset_ttl_hours(),
                )?;
                report("Password reset", &account.email, outcome);
            }
        }
        Some(("revoke-password", sub)) => {
            if let Some(account) = find(&lifecycle, sub)? {
                report("Password revoked", &account.email, lifecycle.revoke_password(account.id)?);
            }
        }
        Some(("login", sub)) => {
            let email = value(sub, "email");
            let password = match sub.get_one::<String>("password") {
                Some(password) => password.clone(),
                None => prompt("Password: ")?,
            };
            match lifecycle.authenticate(email, &password)? {
                Outcome::Applied(id) => println!("Login successful (account {})", id),
                Outcome::Rejected(rejection) => println!("Login failed: {}", rejection),
                Outcome::Unchanged => println!("Login failed"),
            }
        }
        Some(("tokens", sub)) => {
            let verbose = sub.get_flag("verbose");
            let now = lifecycle.now();
            let tokens = lifecycle.tokens().live_tokens(None)?;
            if tokens.is_empty() {
                println!("No live tokens.");
            }
            for token in tokens.iter().sorted_by_key(|t| (t.subject_id, t.purpose)) {
                let purpose = match token.purpose {
                    TokenPurpose::Activation => "activation",
                    TokenPurpose::PasswordReset => "password reset",
                };
                let left = ExpiryPolicy::new(token.ttl_hours)
                    .remaining(token.created_at, now)
                    .map_or_else(|| "expired".to_string(), format_duration);
                if verbose {
                    println!(
                        "account {:>4}  {:<15} created {}  expires {} ({} left)",
                        token.subject_id,
                        purpose,
                        format_timestamp(&token.created_at),
                        format_timestamp(&token.expires_at),
                        left
                    );
                } else {
                    println!(
                        "account {:>4}  {:<15} {} left",
                        token.subject_id,
                        purpose,
                        left
                    );
                }
            }
        }
        Some(("purge-tokens", _)) => {
            let removed = lifecycle.tokens().purge_expired()?;
            println!("Removed {} expired token(s).", removed);
        }
        Some(("rate-check", sub)) => {
            let limiter = RateLimiter::new(config.rates.clone(), store, clock)?;
            let client = value(sub, "client");
            let route = value(sub, "route");
            limiter.check(client, route)?.into_result()?;
            println!("Allowed: {}", limiter.key_for(client, route));
        }
        _ => {
            cli().print_help()?;
            println!();
        }
    }

    Ok(())
}

/// Value of an argument clap guarantees through `required` or `default_value`
fn value<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

fn find(lifecycle: &AccountLifecycle, sub: &ArgMatches) -> Result<Option<Account>, Error> {
    let email = value(sub, "email");
    let account = lifecycle.account_by_email(email)?;
    if account.is_none() {
        println!("Account not found: {}", email);
    }
    Ok(account)
}

fn report(action: &str, email: &str, outcome: Outcome<impl Sized>) {
    match outcome {
        Outcome::Applied(_) => println!("{}: {}", action, email),
        Outcome::Unchanged => println!("Nothing to do for {}", email),
        Outcome::Rejected(rejection) => println!("{} refused for {}: {}", action, email, rejection),
    }
}

fn prompt(label: &str) -> Result<String, Error> {
    print!("{}", label);
    io::stdout().flush()?;
    Ok(read_password()?)
}

/// Take the new password from `--password` or the terminal and check it against the policy
fn new_password(sub: &ArgMatches) -> Result<String, Error> {
    let password = match sub.get_one::<String>("password") {
        Some(password) => password.clone(),
        None => {
            let password = prompt("New password: ")?;
            let confirm = prompt("Confirm password: ")?;
            if password != confirm {
                return Err(Error::Input(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "passwords do not match",
                )));
            }
            password
        }
    };
    validate_password(&password)?;
    Ok(password)
}

fn print_status(account: &Account, lifecycle: &AccountLifecycle) {
    let now = lifecycle.now();
    println!("Account {} <{}>", account.id, account.email);
    println!("  Status:        {} / {}", account.active_status(), account.blocked_status());
    println!("  Password:      {}", account.password_status());
    println!("  Registered:    {}", format_timestamp(&account.created_at));
    println!("  Activated:     {}", format_optional(account.activated_at.as_ref()));
    println!("  Last login:    {}", format_optional(account.authenticated_at.as_ref()));
    if let Some(days) = account.days_since_password_update(now) {
        println!("  Password age:  {} day(s)", days);
    }
    match account.login_denial() {
        None => println!("  Login:         allowed"),
        Some(reason) => println!("  Login:         denied ({})", reason),
    }
}
