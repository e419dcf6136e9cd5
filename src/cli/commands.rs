use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::app::App;
use crate::config::AppConfig;
use crate::phrases::{
    FlushStatus, LoadReport, PhraseDraft, PhraseError, PhraseId, PhraseRecord, PhraseStore,
};
use crate::search::SceneQuery;

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// English text
    pub english: String,
    /// Chinese translation
    pub chinese: String,
    /// Scene the phrase is used in (e.g. "airport")
    pub scene: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Only show phrases whose scene contains this text (case-insensitive)
    #[arg(long)]
    pub scene: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Phrase identifier as shown by `list`
    pub id: PhraseId,
    /// New English text
    #[arg(long)]
    pub english: Option<String>,
    /// New Chinese translation
    #[arg(long)]
    pub chinese: Option<String>,
    /// New scene
    #[arg(long)]
    pub scene: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Phrase identifier as shown by `list`
    pub id: PhraseId,
    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

pub fn run_tui(config: Arc<AppConfig>, store: PhraseStore, report: &LoadReport) -> Result<()> {
    let mut app = App::new(config, store, report);
    app.run()
}

pub fn print(output: Result<String>) -> Result<()> {
    print!("{}", output?);
    Ok(())
}

pub fn add_phrase(store: &mut PhraseStore, args: AddArgs) -> Result<String> {
    let added = store
        .add(PhraseDraft::new(args.english, args.chinese, args.scene))
        .map_err(describe_rejection)?;
    ensure_written(&added.flush)?;
    Ok(format!(
        "Added phrase #{}  {} / {}  [{}]\n",
        added.value.id,
        added.value.english,
        added.value.chinese,
        added.value.scene
    ))
}

pub fn list_phrases(store: &PhraseStore, args: &ListArgs) -> String {
    let query = SceneQuery::new(args.scene.as_deref().unwrap_or(""));
    if store.is_empty() {
        return "No phrases yet. Add one with `phrasecards add`.\n".to_string();
    }
    let phrases = store.filtered(&query);
    if phrases.is_empty() {
        return format!("No phrase matches scene \"{}\".\n", query.text());
    }
    let mut out = String::new();
    for phrase in phrases {
        write_phrase(&mut out, phrase);
    }
    out
}

fn write_phrase(out: &mut String, phrase: &PhraseRecord) {
    let _ = writeln!(out, "#{}  {}", phrase.id, phrase.english);
    let _ = writeln!(out, "    {}", phrase.chinese);
    let _ = writeln!(out, "    scene: {}", phrase.display_scene());
    out.push('\n');
}

pub fn edit_phrase(store: &mut PhraseStore, args: EditArgs) -> Result<String> {
    let Some(current) = store.get(args.id) else {
        return Ok(format!("No phrase with id {}; nothing changed.\n", args.id));
    };
    let draft = PhraseDraft::new(
        args.english.unwrap_or_else(|| current.english.clone()),
        args.chinese.unwrap_or_else(|| current.chinese.clone()),
        args.scene.unwrap_or_else(|| current.scene.clone()),
    );
    match store.update(args.id, draft) {
        Ok(updated) => {
            ensure_written(&updated.flush)?;
            let mut out = String::from("Updated:\n");
            write_phrase(&mut out, &updated.value);
            Ok(out)
        }
        Err(PhraseError::NotFound(id)) => Ok(format!("No phrase with id {id}; nothing changed.\n")),
        Err(err) => Err(describe_rejection(err)),
    }
}

pub fn delete_phrase<F>(store: &mut PhraseStore, args: DeleteArgs, confirm: F) -> Result<String>
where
    F: FnOnce(&PhraseRecord) -> Result<bool>,
{
    let Some(record) = store.get(args.id) else {
        return Ok(format!("No phrase with id {}; nothing deleted.\n", args.id));
    };
    if !args.yes && !confirm(record)? {
        return Ok("Delete canceled.\n".to_string());
    }
    match store.remove(args.id) {
        Ok(removed) => {
            ensure_written(&removed.flush)?;
            Ok(format!(
                "Deleted phrase #{}  {}\n",
                removed.value.id, removed.value.english
            ))
        }
        Err(PhraseError::NotFound(id)) => Ok(format!("No phrase with id {id}; nothing deleted.\n")),
        Err(err) => Err(err.into()),
    }
}

/// Asks on the terminal; refuses when stdin is piped so scripts must pass `--yes`.
pub fn confirm_on_terminal(record: &PhraseRecord) -> Result<bool> {
    if !atty::is(atty::Stream::Stdin) {
        bail!("stdin is not a terminal; pass --yes to delete phrase #{}", record.id);
    }
    let mut stdout = io::stdout();
    write!(
        stdout,
        "确定要删除这个卡片吗？ Delete #{} \"{}\"? [y/N] ",
        record.id, record.english
    )?;
    stdout.flush()?;
    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("reading confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "YES"))
}

fn ensure_written(flush: &FlushStatus) -> Result<()> {
    if let FlushStatus::Deferred { reason } = flush {
        bail!("change could not be saved: {reason}");
    }
    Ok(())
}

fn describe_rejection(err: PhraseError) -> anyhow::Error {
    match err {
        PhraseError::Validation { .. } => {
            anyhow::anyhow!("所有字段都不能为空: {err}")
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPaths, StorageBackend, StorageOptions};
    use crate::phrases::UNSET_SCENE;
    use crate::storage;
    use std::fs;
    use tempfile::TempDir;

    type TestResult<T = ()> = Result<T>;

    fn setup_store(backend: StorageBackend) -> TestResult<(TempDir, StorageOptions, PhraseStore)> {
        let temp = TempDir::new().context("creating temp dir")?;
        let paths = ConfigPaths::under(temp.path());
        paths.ensure_directories()?;
        let mut options = StorageOptions {
            backend,
            ..StorageOptions::default()
        };
        options.resolve(&paths)?;
        let handle = storage::init(&options)?;
        let (store, _report) = PhraseStore::open(handle, &options);
        Ok((temp, options, store))
    }

    fn reopen(options: &StorageOptions) -> TestResult<PhraseStore> {
        let handle = storage::init(options)?;
        Ok(PhraseStore::open(handle, options).0)
    }

    fn add(store: &mut PhraseStore, english: &str, chinese: &str, scene: &str) -> TestResult<PhraseId> {
        add_phrase(
            store,
            AddArgs {
                english: english.into(),
                chinese: chinese.into(),
                scene: scene.into(),
            },
        )?;
        store
            .iter()
            .last()
            .map(|phrase| phrase.id)
            .context("phrase added")
    }

    #[test]
    fn cli_add_and_list_survive_reopen() -> TestResult {
        let (_temp, options, mut store) = setup_store(StorageBackend::Sqlite)?;
        add(&mut store, "Hello", "你好", "greeting")?;
        add(&mut store, "Boarding pass", "登机牌", "Airport")?;

        let reopened = reopen(&options)?;
        let all = list_phrases(&reopened, &ListArgs::default());
        assert!(all.contains("Hello"));
        assert!(all.contains("Boarding pass"));

        let filtered = list_phrases(
            &reopened,
            &ListArgs {
                scene: Some(" airport ".into()),
            },
        );
        assert!(filtered.contains("Boarding pass"));
        assert!(!filtered.contains("Hello"));

        let none = list_phrases(&reopened, &ListArgs { scene: Some("meet".into()) });
        assert!(none.contains("No phrase matches"));
        Ok(())
    }

    #[test]
    fn cli_add_rejects_blank_field() -> TestResult {
        let (_temp, _options, mut store) = setup_store(StorageBackend::Memory)?;
        let err = add_phrase(
            &mut store,
            AddArgs {
                english: "Hello".into(),
                chinese: "  ".into(),
                scene: "greeting".into(),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("chinese"));
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn cli_edit_keeps_omitted_fields() -> TestResult {
        let (_temp, options, mut store) = setup_store(StorageBackend::JsonFile)?;
        let id = add(&mut store, "Hello", "你好", "greeting")?;
        let output = edit_phrase(
            &mut store,
            EditArgs {
                id,
                english: None,
                chinese: None,
                scene: Some("daily".into()),
            },
        )?;
        assert!(output.contains("scene: daily"));

        let reopened = reopen(&options)?;
        let phrase = reopened.get(id).context("phrase persisted")?;
        assert_eq!(phrase.english, "Hello");
        assert_eq!(phrase.scene, "daily");
        Ok(())
    }

    #[test]
    fn cli_edit_and_delete_of_unknown_id_are_noops() -> TestResult {
        let (_temp, _options, mut store) = setup_store(StorageBackend::Memory)?;
        let edited = edit_phrase(
            &mut store,
            EditArgs {
                id: 7,
                english: Some("x".into()),
                chinese: None,
                scene: None,
            },
        )?;
        assert!(edited.contains("nothing changed"));
        let deleted = delete_phrase(&mut store, DeleteArgs { id: 7, yes: true }, |_| Ok(true))?;
        assert!(deleted.contains("nothing deleted"));
        Ok(())
    }

    #[test]
    fn cli_delete_honours_confirmation() -> TestResult {
        let (_temp, options, mut store) = setup_store(StorageBackend::Sqlite)?;
        let id = add(&mut store, "Hello", "你好", "greeting")?;

        let declined = delete_phrase(&mut store, DeleteArgs { id, yes: false }, |_| Ok(false))?;
        assert!(declined.contains("canceled"));
        assert!(store.contains(id));

        let mut asked = false;
        let deleted = delete_phrase(&mut store, DeleteArgs { id, yes: true }, |_| {
            asked = true;
            Ok(true)
        })?;
        assert!(!asked);
        assert!(deleted.contains("Deleted phrase"));
        assert!(reopen(&options)?.is_empty());
        Ok(())
    }

    #[test]
    fn cli_list_migrates_legacy_json_slot() -> TestResult {
        let (_temp, options, _store) = setup_store(StorageBackend::JsonFile)?;
        fs::write(
            options.json_path(),
            r#"[{"id": 1, "english": "Thanks", "chinese": "谢谢", "audioUrl": "t.mp3"}]"#,
        )?;
        let store = reopen(&options)?;
        let output = list_phrases(&store, &ListArgs::default());
        assert!(output.contains(&format!("scene: {UNSET_SCENE}")));
        let raw = fs::read_to_string(options.json_path())?;
        assert!(!raw.contains("audioUrl"));
        Ok(())
    }
}
