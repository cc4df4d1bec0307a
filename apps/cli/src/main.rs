use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use notetree_settings::{
    ExpansionStateFile, PersistedExpansion, PreferencesStore, TreePreferences,
};
use notetree_sync::{
    ChangeEventCoordinator, RefreshOutcome, TreeController, VaultMonitor, VaultSource, VisibleRow,
};
use notetree_tree::{identifier, NodeKind, PathTreeBuilder};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const STATE_DIR_NAME: &str = ".notetree";
const IDLE_WAIT: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(
    name = "notetree-cli",
    about = "Browse a vault of dot-named notes as a tree",
    author,
    version
)]
struct Cli {
    /// 筆記庫根目錄；預設為目前目錄。 / Vault root (defaults to current directory).
    #[arg(long, global = true, value_name = "PATH")]
    vault: Option<PathBuf>,
    /// 狀態與偏好設定目錄；預設為 `<vault>/.notetree`。 / State directory (defaults to `<vault>/.notetree`).
    #[arg(long, global = true, value_name = "PATH")]
    state_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 印出目前可見的樹。 / Print the visible tree.
    Tree(TreeArgs),
    /// 切換節點的展開狀態。 / Toggle a node between expanded and collapsed.
    Toggle(NodeArgs),
    /// 展開所有節點。 / Expand every node currently in the tree.
    ExpandAll,
    /// 收合所有節點。 / Collapse every node.
    CollapseAll,
    /// 選取項目並展開其祖先。 / Select an entry and expand its ancestors.
    Reveal(NodeArgs),
    /// 匯出、匯入或重設展開狀態。 / Export, import or reset the expansion state.
    #[command(subcommand)]
    State(StateCommand),
    /// 監看筆記庫並回報每次刷新。 / Watch the vault and report every refresh.
    Watch(WatchArgs),
    /// 匯入/匯出偏好設定。 / Import or export preferences.
    #[command(subcommand)]
    Preferences(PreferencesCommand),
}

#[derive(Args)]
struct TreeArgs {
    /// 忽略展開狀態列出所有節點。 / List every node regardless of expansion.
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct NodeArgs {
    /// 節點識別碼，例如 `project.module`。 / Node identifier such as `project.module`.
    #[arg(value_name = "ID")]
    identifier: String,
}

#[derive(Subcommand)]
enum StateCommand {
    /// 匯出展開狀態 JSON。 / Export the expansion state as JSON.
    Export(StateExportArgs),
    /// 由 JSON 匯入展開狀態。 / Import the expansion state from JSON.
    Import(StateImportArgs),
    /// 清除展開狀態。 / Forget every expanded node.
    Reset,
}

#[derive(Args)]
struct StateExportArgs {
    /// 輸出檔案；省略時寫到標準輸出。 / Destination file; stdout when omitted.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct StateImportArgs {
    /// 輸入檔案路徑。 / Source state JSON.
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

#[derive(Subcommand)]
enum PreferencesCommand {
    /// 匯出目前偏好設定。 / Export current preferences.
    Export(PreferencesExportArgs),
    /// 匯入偏好設定 JSON。 / Import preferences from JSON.
    Import(PreferencesImportArgs),
}

#[derive(Args)]
struct PreferencesExportArgs {
    /// 輸出檔案路徑。 / Destination file path.
    #[arg(long, value_name = "FILE")]
    output: PathBuf,
}

#[derive(Args)]
struct PreferencesImportArgs {
    /// 輸入檔案路徑。 / Source preferences JSON.
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

#[derive(Args)]
struct WatchArgs {
    /// 監看秒數；省略時持續執行。 / Seconds to watch; runs until interrupted when omitted.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,
}

/// 一次指令執行所需的路徑與設定。 / Paths and settings resolved for one invocation.
struct Session {
    vault: PathBuf,
    preferences_store: PreferencesStore,
    preferences: TreePreferences,
    state_file: ExpansionStateFile,
}

impl Session {
    fn open(vault: Option<PathBuf>, state_dir: Option<PathBuf>) -> Result<Self> {
        let vault = resolve_path(vault)?;
        let state_dir = match state_dir {
            Some(dir) => resolve_path(Some(dir))?,
            None => vault.join(STATE_DIR_NAME),
        };
        let prefs_path = state_dir.join("preferences.json");
        let store = PreferencesStore::load(&prefs_path)
            .with_context(|| format!("failed to load preferences from {}", prefs_path.display()))?;
        debug!(vault = %vault.display(), state_dir = %state_dir.display(), "session opened");
        Ok(Self {
            vault,
            preferences: store.preferences().clone(),
            preferences_store: store,
            state_file: ExpansionStateFile::new(state_dir.join("expansion.json")),
        })
    }

    fn source(&self) -> VaultSource {
        VaultSource::new(&self.vault, self.preferences.note_extension.clone())
    }

    fn controller(&self) -> Result<TreeController<VaultSource>> {
        let mut state = self.state_file.load_store();
        if self.preferences.persist_on_change {
            self.state_file.attach(&mut state);
        }
        let builder = PathTreeBuilder::with_policy(self.preferences.collision_policy);
        TreeController::new(self.source(), state, builder)
            .with_context(|| format!("failed to read vault {}", self.vault.display()))
    }

    /// 結束前寫回狀態。 / Writes the state back before exiting.
    fn save(&self, controller: &TreeController<VaultSource>) -> Result<()> {
        self.save_persisted(&controller.state().persisted())
    }

    fn save_persisted(&self, persisted: &PersistedExpansion) -> Result<()> {
        self.state_file.save(persisted).with_context(|| {
            format!(
                "failed to save expansion state to {}",
                self.state_file.path().display()
            )
        })
    }
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<()> {
    let Cli {
        vault,
        state_dir,
        command,
    } = Cli::parse();
    let session = Session::open(vault, state_dir)?;
    match command {
        Commands::Tree(args) => execute_tree(&session, args),
        Commands::Toggle(args) => execute_toggle(&session, args),
        Commands::ExpandAll => {
            let mut controller = session.controller()?;
            controller.expand_all();
            session.save(&controller)?;
            println!("Expanded {} nodes", controller.state().expanded_count());
            Ok(())
        }
        Commands::CollapseAll => {
            let mut controller = session.controller()?;
            controller.collapse_all();
            session.save(&controller)?;
            println!("Collapsed all nodes");
            Ok(())
        }
        Commands::Reveal(args) => execute_reveal(&session, args),
        Commands::State(command) => execute_state_command(&session, command),
        Commands::Watch(args) => execute_watch(&session, args),
        Commands::Preferences(command) => execute_preferences_command(session, command),
    }
}

fn execute_tree(session: &Session, args: TreeArgs) -> Result<()> {
    let controller = session.controller()?;
    let rows = if args.all {
        controller.all_rows()
    } else {
        controller.visible_rows()
    };
    print_rows(&rows);
    Ok(())
}

fn execute_toggle(session: &Session, args: NodeArgs) -> Result<()> {
    let mut controller = session.controller()?;
    ensure_node(&controller, &args.identifier)?;
    let expanded = controller.toggle(&args.identifier);
    session.save(&controller)?;
    let verb = if expanded { "Expanded" } else { "Collapsed" };
    println!("{verb} {}", args.identifier);
    Ok(())
}

fn execute_reveal(session: &Session, args: NodeArgs) -> Result<()> {
    let mut controller = session.controller()?;
    ensure_node(&controller, &args.identifier)?;
    controller.reveal(&args.identifier, true);
    session.save(&controller)?;
    print_rows(&controller.visible_rows());
    Ok(())
}

fn execute_state_command(session: &Session, command: StateCommand) -> Result<()> {
    match command {
        StateCommand::Export(args) => {
            let persisted = session.state_file.load();
            let payload = serde_json::to_string_pretty(&persisted)
                .context("failed to serialize expansion state")?;
            match args.output {
                Some(output) => {
                    let output = resolve_path(Some(output))?;
                    if let Some(parent) = output.parent() {
                        fs::create_dir_all(parent)
                            .with_context(|| format!("failed to create {}", parent.display()))?;
                    }
                    fs::write(&output, payload)
                        .with_context(|| format!("failed to write {}", output.display()))?;
                    println!("Exported expansion state to {}", output.display());
                }
                None => println!("{payload}"),
            }
            Ok(())
        }
        StateCommand::Import(args) => {
            let input = resolve_path(Some(args.input))?;
            if !input.exists() {
                bail!("state file '{}' does not exist", input.display());
            }
            let contents = fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let persisted: PersistedExpansion = serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse {}", input.display()))?;
            let mut controller = session.controller()?;
            let valid = persisted
                .expanded_nodes
                .into_iter()
                .filter(|id| identifier::validate(id).is_ok());
            controller.state_mut().restore_state(valid);
            session.save(&controller)?;
            println!(
                "Imported {} expanded nodes from {}",
                controller.state().expanded_count(),
                input.display()
            );
            Ok(())
        }
        StateCommand::Reset => {
            session.save_persisted(&PersistedExpansion::default())?;
            println!("Expansion state reset");
            Ok(())
        }
    }
}

fn execute_preferences_command(session: Session, command: PreferencesCommand) -> Result<()> {
    let mut store = session.preferences_store;
    match command {
        PreferencesCommand::Export(args) => {
            let output = resolve_path(Some(args.output))?;
            store.export_to(&output).with_context(|| {
                format!("failed to export preferences to {}", output.display())
            })?;
            println!("Exported preferences to {}", output.display());
        }
        PreferencesCommand::Import(args) => {
            let input = resolve_path(Some(args.input))?;
            if !input.exists() {
                bail!("preferences file '{}' does not exist", input.display());
            }
            store.import_from(&input).with_context(|| {
                format!("failed to import preferences from {}", input.display())
            })?;
            println!("Imported preferences from {}", input.display());
        }
    }
    Ok(())
}

fn execute_watch(session: &Session, args: WatchArgs) -> Result<()> {
    let mut controller = session.controller()?;
    let monitor = VaultMonitor::watch(controller.source().layout())
        .with_context(|| format!("failed to watch {}", session.vault.display()))?;
    let mut coordinator = ChangeEventCoordinator::from_preferences(&session.preferences);
    let stop_at = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    info!(vault = %session.vault.display(), "watching for changes");
    println!("Watching {}", session.vault.display());

    loop {
        let now = Instant::now();
        if stop_at.is_some_and(|stop| now >= stop) {
            break;
        }
        let mut wait = coordinator.time_until_ready(now).unwrap_or(IDLE_WAIT);
        if let Some(stop) = stop_at {
            wait = wait.min(stop.saturating_duration_since(now));
        }
        if let Some(event) = monitor.recv_timeout(wait)? {
            coordinator.on_entity_event(event, Instant::now());
        }
        if let Some(request) = coordinator.poll(Instant::now()) {
            if let Some(outcome) = controller.refresh_or_keep(request) {
                report_outcome(&controller, &outcome);
            }
        }
    }

    if let Some(request) = coordinator.flush() {
        if let Some(outcome) = controller.refresh_or_keep(request) {
            report_outcome(&controller, &outcome);
        }
    }
    session.save(&controller)
}

fn report_outcome(controller: &TreeController<VaultSource>, outcome: &RefreshOutcome) {
    match outcome {
        RefreshOutcome::SubtreesReplaced { roots } => {
            println!("Patched subtrees: {}", roots.join(", "));
        }
        RefreshOutcome::TreeReplaced => {
            println!("Rebuilt tree ({} nodes)", controller.snapshot().len());
        }
    }
}

fn ensure_node(controller: &TreeController<VaultSource>, id: &str) -> Result<()> {
    if let Err(err) = identifier::validate(id) {
        bail!("invalid identifier '{id}': {err}");
    }
    if !controller.snapshot().contains(id) {
        bail!("no node named '{id}' in the vault");
    }
    Ok(())
}

fn print_rows(rows: &[VisibleRow]) {
    for row in rows {
        println!("{}", format_row(row));
    }
}

fn format_row(row: &VisibleRow) -> String {
    let marker = match (row.has_children, row.expanded) {
        (false, _) => ' ',
        (true, true) => '-',
        (true, false) => '+',
    };
    let mut line = format!("{}{marker} {}", "  ".repeat(row.depth), row.name);
    if row.kind == NodeKind::Virtual {
        line.push_str(" (virtual)");
    }
    if row.active {
        line.push_str(" *");
    }
    line
}

fn resolve_path(path: Option<PathBuf>) -> Result<PathBuf> {
    let cwd = || std::env::current_dir().context("determine current directory");
    match path {
        Some(path) if path.is_absolute() => Ok(path),
        Some(path) => Ok(cwd()?.join(path)),
        None => cwd(),
    }
}
