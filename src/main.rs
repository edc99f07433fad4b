//! Tourney Registry CLI
//!
//! 锦标赛队伍报名：创建队伍、邀请、加入、退出、踢人、解散

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use tourney_registry::{
    cli::{format_output, format_team_line, ExecArgs, ServeArgs},
    Config, MemberId, TeamRegistry,
};

#[derive(Parser)]
#[command(name = "trn")]
#[command(about = "Tourney Registry - 锦标赛队伍报名与成员管理")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 以指定用户身份执行一条聊天命令
    Exec(ExecArgs),
    /// 从 stdin 读取聊天事件流（每行一个 JSON）并输出回复
    Serve(ServeArgs),
    /// 按报名顺序列出所有队伍
    Teams {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 查看指定队伍
    Team {
        /// 队伍名称
        #[arg(required = true)]
        name: Vec<String>,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 查询用户所在队伍
    Whois {
        /// 用户 ID
        member: MemberId,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 校验存储的队伍数据
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 环境变量控制日志级别，默认为 info
    // 例如: RUST_LOG=debug trn serve
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tourney_registry=info,trn=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Exec(args) => {
            if !tourney_registry::cli::handle_exec(args, &config)? {
                std::process::exit(1);
            }
        }
        Commands::Serve(args) => {
            tourney_registry::cli::handle_serve(args, &config).await?;
        }
        Commands::Teams { json } => {
            let registry = open_registry(&config)?;
            let teams = registry.teams();

            if json {
                println!("{}", format_output(&teams));
            } else {
                let settings = registry.settings();
                println!(
                    "{} 支队伍 (上限 {} 队, 每队 {} 人):\n",
                    teams.len(),
                    settings.max_teams,
                    settings.max_players
                );
                for team in &teams {
                    println!("{}", format_team_line(team, settings.max_teams));
                }
            }
        }
        Commands::Team { name, json } => {
            let registry = open_registry(&config)?;
            let name = name.join(" ");

            match registry.get(&name) {
                Some(team) if json => println!("{}", format_output(&team)),
                Some(team) => {
                    println!("{}", format_team_line(&team, registry.settings().max_teams));
                    if !team.invites.is_empty() {
                        let invites: Vec<String> =
                            team.invites.iter().map(|m| m.to_string()).collect();
                        println!("  待接受邀请: {}", invites.join(", "));
                    }
                }
                None => {
                    eprintln!("队伍 `{}` 不存在", name);
                    std::process::exit(1);
                }
            }
        }
        Commands::Whois { member, json } => {
            let registry = open_registry(&config)?;
            let team = registry.lookup_by_member(member);

            if json {
                println!("{}", format_output(&team));
            } else {
                match team {
                    Some(team) => println!("{} 在队伍 `{}`", member, team.name),
                    None => println!("{} 不在任何队伍", member),
                }
            }
        }
        Commands::Check => {
            let registry = open_registry(&config)?;
            let violations = registry.invariant_violations();

            if violations.is_empty() {
                println!(
                    "OK: {} 支队伍, 数据目录 {}",
                    registry.teams().len(),
                    config.data_dir.display()
                );
            } else {
                for violation in &violations {
                    println!("  - {}", violation);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn open_registry(config: &Config) -> Result<TeamRegistry<tourney_registry::JsonFileStore>> {
    TeamRegistry::open(config.open_store())
        .with_context(|| format!("failed to open team documents in {}", config.data_dir.display()))
}
