use anyhow::Result;
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "LAN-Drop 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建守护进程 (release)
    Build,
    /// 运行守护进程 (开发模式)
    Dev {
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "debug")]
        log_level: String,
        /// HTTP 端口
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
        /// 开放共享目录下载
        #[arg(long)]
        enable_downloads: bool,
    },
    /// 安装 systemd 用户服务
    Install,
    /// 卸载 systemd 用户服务
    Uninstall,
    /// 打包发布 (tar.gz)
    Dist,
    /// 运行测试
    Test,
    /// 运行测试并生成覆盖率报告
    Coverage,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => std::path::PathBuf::from(dir)
            .parent()
            .map(std::path::Path::to_path_buf)
            .ok_or_else(|| anyhow::anyhow!("xtask must live inside the workspace"))?,
        Err(_) => std::env::current_dir()?,
    };
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Dev {
            log_level,
            port,
            enable_downloads,
        } => dev(&sh, &log_level, port, enable_downloads)?,
        Commands::Install => install(&sh)?,
        Commands::Uninstall => uninstall(&sh)?,
        Commands::Dist => dist(&sh)?,
        Commands::Test => test(&sh)?,
        Commands::Coverage => coverage(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建守护进程...");
    cmd!(sh, "cargo build --release -p landrop-daemon").run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn dev(sh: &Shell, log_level: &str, port: u16, enable_downloads: bool) -> Result<()> {
    println!("🚀 启动开发模式守护进程...");
    println!("   日志级别: {}", log_level);
    println!("   端口: {}", port);

    let rust_log = format!("{level},landrop_core={level},webrtc=warn", level = log_level);
    let port = port.to_string();
    let downloads: &[&str] = if enable_downloads {
        &["--enable-downloads"]
    } else {
        &[]
    };

    cmd!(sh, "cargo run -p landrop-daemon -- --port {port} {downloads...}")
        .env("RUST_LOG", rust_log)
        .run()?;
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📦 安装 LAN-Drop 用户服务...");

    build(sh)?;

    // 先停止已运行的服务（如果存在）
    println!("⏹️  停止现有服务...");
    let _ = cmd!(sh, "systemctl --user stop landrop.service").run();

    let home = std::env::var("HOME")?;
    let bin_dir = format!("{home}/.local/bin");
    let unit_dir = format!("{home}/.config/systemd/user");

    println!("📋 复制二进制文件...");
    cmd!(sh, "mkdir -p {bin_dir} {unit_dir}").run()?;
    cmd!(sh, "cp target/release/landrop-daemon {bin_dir}/").run()?;
    cmd!(sh, "cp assets/landrop.service {unit_dir}/").run()?;

    cmd!(sh, "systemctl --user daemon-reload").run()?;
    cmd!(sh, "systemctl --user enable --now landrop.service").run()?;

    println!("✅ 服务安装完成");
    println!("   使用 'systemctl --user status landrop' 查看服务状态");
    println!("   使用 'journalctl --user -u landrop -f' 查看日志");
    Ok(())
}

fn uninstall(sh: &Shell) -> Result<()> {
    println!("🗑️  卸载 LAN-Drop 用户服务...");

    let _ = cmd!(sh, "systemctl --user stop landrop.service").run();
    let _ = cmd!(sh, "systemctl --user disable landrop.service").run();

    let home = std::env::var("HOME")?;
    let _ = cmd!(sh, "rm {home}/.config/systemd/user/landrop.service").run();
    let _ = cmd!(sh, "rm {home}/.local/bin/landrop-daemon").run();

    cmd!(sh, "systemctl --user daemon-reload").run()?;

    println!("✅ 卸载完成");
    Ok(())
}

fn dist(sh: &Shell) -> Result<()> {
    println!("📦 打包发布...");

    build(sh)?;

    let version = env!("CARGO_PKG_VERSION");
    let dist_name = format!(
        "landrop-{}-{}-{}",
        version,
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    cmd!(sh, "mkdir -p dist/{dist_name}").run()?;
    cmd!(sh, "cp target/release/landrop-daemon dist/{dist_name}/").run()?;
    cmd!(sh, "cp assets/landrop.service dist/{dist_name}/").run()?;

    sh.change_dir("dist");
    cmd!(sh, "tar -czvf {dist_name}.tar.gz {dist_name}").run()?;

    println!("✅ 打包完成: dist/{}.tar.gz", dist_name);
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("🧪 运行测试...");
    cmd!(sh, "cargo test --workspace").run()?;
    println!("✅ 测试完成");
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    println!("📊 运行测试覆盖率分析...");

    // 检查 cargo-tarpaulin 是否安装
    if cmd!(sh, "cargo tarpaulin --version").run().is_err() {
        println!("📦 安装 cargo-tarpaulin...");
        cmd!(sh, "cargo install cargo-tarpaulin").run()?;
    }

    println!("🔍 分析中...");
    cmd!(
        sh,
        "cargo tarpaulin --packages landrop-core --out Html --output-dir target/coverage"
    )
    .run()?;

    println!("✅ 覆盖率报告已生成");
    println!("   HTML 报告: target/coverage/tarpaulin-report.html");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    cmd!(sh, "rm -rf dist").run()?;
    println!("✅ 清理完成");
    Ok(())
}
