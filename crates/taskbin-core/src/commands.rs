use std::io::{self, BufRead, Write};
use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info, instrument};

use crate::access::{AccessGate, DEFAULT_WRITE_SECRET, FileTokenSlot};
use crate::address::{self, AddressSync};
use crate::board::{Board, Saved};
use crate::cli::{Command, FilterArgs};
use crate::config::{Backend, Config};
use crate::criteria::{Criteria, CriteriaStore};
use crate::editor::TaskForm;
use crate::render::Renderer;
use crate::store::{AnyRecordStore, FileRecordStore, HttpRecordStore, RecordStore};
use crate::task::TaskKey;

pub const TOKEN_FILE: &str = "task-token";
pub const COLLECTION_FILE: &str = "collection.json";

/// Access gate over the token file under the data directory.
pub fn open_gate(cfg: &Config, data_dir: &Path) -> anyhow::Result<AccessGate> {
    let slot = FileTokenSlot::new(cfg.path_or("token.location", data_dir, TOKEN_FILE));
    let secret = cfg
        .get("access.secret")
        .unwrap_or_else(|| DEFAULT_WRITE_SECRET.to_string());
    AccessGate::open(Box::new(slot), secret)
}

#[instrument(skip(cfg))]
pub fn open_store(cfg: &Config, data_dir: &Path) -> anyhow::Result<AnyRecordStore> {
    match cfg.backend()? {
        Backend::Http => {
            let base = cfg
                .get("store.url")
                .ok_or_else(|| anyhow!("store.url is not set"))?;
            let collection = cfg
                .get("store.collection")
                .ok_or_else(|| anyhow!("store.collection is not set"))?;
            let store = HttpRecordStore::new(
                &base,
                &collection,
                cfg.get("store.access_key"),
                cfg.timeout()?,
            )?;
            info!(endpoint = store.endpoint(), "using http record store");
            Ok(AnyRecordStore::Http(store))
        }
        Backend::File => {
            let path = cfg.path_or("store.file", data_dir, COLLECTION_FILE);
            Ok(AnyRecordStore::File(FileRecordStore::open(&path)?))
        }
    }
}

/// Address-carried criteria from `--address`, then each explicit flag.
pub fn criteria_from(filter: &FilterArgs) -> anyhow::Result<Criteria> {
    let (_, seeded) = AddressSync::seed(filter.address.as_deref().unwrap_or_default());
    let mut criteria = CriteriaStore::new(seeded);
    filter.apply(&mut criteria)?;
    Ok(criteria.current().clone())
}

pub fn open_board(
    cfg: &Config,
    data_dir: &Path,
    address: &str,
) -> anyhow::Result<Board<AnyRecordStore>> {
    let store = open_store(cfg, data_dir)?;
    let gate = open_gate(cfg, data_dir)?;
    debug!(writable = gate.is_writable(), "access gate ready");
    Ok(Board::new(store, gate, address))
}

#[instrument(skip(cfg, renderer, command))]
pub async fn dispatch(
    cfg: &Config,
    data_dir: &Path,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Link { filter } => {
            println!("?{}", address::encode(&criteria_from(&filter)?));
            Ok(())
        }
        Command::List {
            filter,
            page,
            page_size,
        } => {
            let criteria = criteria_from(&filter)?;
            let page_size = match page_size {
                Some(size) => size,
                None => cfg.page_size()?,
            };
            let board = open_board(cfg, data_dir, &address::encode(&criteria))?;
            board.update_criteria(|c| {
                c.set_page_size(page_size);
                c.set_page_index(page.unwrap_or(NonZeroUsize::MIN));
            });
            cmd_list(&board, renderer).await
        }
        Command::Add { form } => {
            let board = open_board(cfg, data_dir, "")?;
            let form = TaskForm::blank().merge(form.into());
            cmd_add(&board, renderer, &form).await.map(|_| ())
        }
        Command::Edit { key, form } => {
            let board = open_board(cfg, data_dir, "")?;
            cmd_edit(&board, renderer, &TaskKey::from(key), form.into()).await
        }
        Command::Delete { key, yes } => {
            let board = open_board(cfg, data_dir, "")?;
            cmd_delete(
                &board,
                renderer,
                &TaskKey::from(key),
                yes,
                io::stdin().lock(),
                io::stderr(),
            )
            .await
        }
        Command::Unlock { token } => {
            let board = open_board(cfg, data_dir, "")?;
            let accepted = board.unlock(&token);
            renderer.print_notices(&board.drain_notices())?;
            if !accepted? {
                bail!("access token rejected");
            }
            Ok(())
        }
        Command::Lock => {
            let board = open_board(cfg, data_dir, "")?;
            let locked = board.lock();
            renderer.print_notices(&board.drain_notices())?;
            Ok(locked?)
        }
        Command::Access => {
            let gate = open_gate(cfg, data_dir)?;
            let state = if gate.is_writable() {
                "writable"
            } else if gate.has_token() {
                "read-only (stored token does not match)"
            } else {
                "read-only"
            };
            println!("{state}");
            Ok(())
        }
    }
}

async fn load<S: RecordStore>(board: &Board<S>, renderer: &Renderer) -> anyhow::Result<()> {
    let fetched = board.refresh().await;
    renderer.print_notices(&board.drain_notices())?;
    fetched.context("could not load the task collection")?;
    Ok(())
}

fn ensure_writable<S: RecordStore>(board: &Board<S>) -> anyhow::Result<()> {
    if !board.is_writable() {
        bail!("read-only session; run `taskbin unlock <token>` first");
    }
    Ok(())
}

pub async fn cmd_list<S: RecordStore>(board: &Board<S>, renderer: &Renderer) -> anyhow::Result<()> {
    load(board, renderer).await?;
    renderer.print_window(&board.visible(), &board.address())
}

pub async fn cmd_add<S: RecordStore>(
    board: &Board<S>,
    renderer: &Renderer,
    form: &TaskForm,
) -> anyhow::Result<TaskKey> {
    ensure_writable(board)?;
    form.validate()?;
    load(board, renderer).await?;

    let saved = board.submit(form, None).await;
    renderer.print_notices(&board.drain_notices())?;
    match saved? {
        Saved::Created(key) => {
            if let Some(record) = board.find(&key) {
                renderer.print_record(&record)?;
            }
            Ok(key)
        }
        other => Err(anyhow!("unexpected save outcome: {other:?}")),
    }
}

pub async fn cmd_edit<S: RecordStore>(
    board: &Board<S>,
    renderer: &Renderer,
    key: &TaskKey,
    changes: TaskForm,
) -> anyhow::Result<()> {
    ensure_writable(board)?;
    load(board, renderer).await?;

    let form = board
        .edit_form(key)
        .ok_or_else(|| anyhow!("no task with key {key}"))?
        .merge(changes);
    let saved = board.submit(&form, Some(key)).await;
    renderer.print_notices(&board.drain_notices())?;
    match saved? {
        Saved::Missing(key) => bail!("task {key} disappeared before it could be saved"),
        _ => {
            if let Some(record) = board.find(key) {
                renderer.print_record(&record)?;
            }
            Ok(())
        }
    }
}

pub async fn cmd_delete<S, R, W>(
    board: &Board<S>,
    renderer: &Renderer,
    key: &TaskKey,
    assume_yes: bool,
    input: R,
    prompt_out: W,
) -> anyhow::Result<()>
where
    S: RecordStore,
    R: BufRead,
    W: Write,
{
    ensure_writable(board)?;
    load(board, renderer).await?;

    let request = board
        .request_delete(key)?
        .ok_or_else(|| anyhow!("no task with key {key}"))?;

    if !assume_yes && !confirm(input, prompt_out, &request.prompt())? {
        board.cancel_delete();
        println!("Cancelled");
        return Ok(());
    }

    let deleted = board.confirm_delete().await;
    renderer.print_notices(&board.drain_notices())?;
    if !deleted? {
        bail!("task {key} disappeared before it could be deleted");
    }
    Ok(())
}

/// Asks a y/N question; anything but `y`/`yes` declines.
pub fn confirm<R: BufRead, W: Write>(
    mut input: R,
    mut output: W,
    question: &str,
) -> anyhow::Result<bool> {
    write!(output, "{question} [y/N] ")?;
    output.flush()?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("failed reading confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}
