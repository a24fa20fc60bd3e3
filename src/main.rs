//! 手話認識の対話画面（コンソール版）
//!
//! 使い方: sign_recognizer [設定ファイル] [静止画ディレクトリ]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sign_recognizer::commands;
use sign_recognizer::{AppConfig, RecognitionSession, StillsCamera};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

const HELP: &str = "\
commands:
  label <text>        set the training label
  recognize [path]    take a picture and recognize it
  capture [path]      take a picture for the current training label
  train               train on the captured pictures (runs in background)
  cancel              cancel the running training
  status              show the current screen state
  help                show this help
  quit                exit";

type Session = RecognitionSession<StillsCamera>;

fn alert(message: &str) {
    println!("> {}", message);
}

fn spawn_training(session: Arc<Session>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match commands::train(&session).await {
            Ok(report) => {
                for line in &report.log_lines {
                    println!("  {}", line);
                }
                alert(&report.message);
            }
            Err(message) => alert(&message),
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = sign_recognizer::logging::init() {
        eprintln!("警告: ログの初期化に失敗しました: {}", e);
    }

    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => AppConfig::load(path).with_context(|| format!("設定ファイル {} を読み込めません", path))?,
        None => AppConfig::load_or_default(),
    };
    config.display();

    let stills_dir = args
        .get(2)
        .cloned()
        .or_else(|| config.camera.stills_dir.clone())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("stills"));

    let session = Arc::new(RecognitionSession::new(&config, StillsCamera::new(&stills_dir))?);
    if let Err(e) = session.init().await {
        alert(&e.user_message());
    }
    if !session.camera().dir().is_dir() {
        alert("Camera permission is required for this app to work.");
    }

    println!("{}", HELP);
    let mut training: Option<JoinHandle<()>> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "label" => {
                session.set_training_label(arg);
                alert(&format!("Training label: {}", arg));
            }
            "recognize" => {
                let result = if arg.is_empty() {
                    commands::recognize(&session).await
                } else {
                    commands::recognize_still(&session, arg).await
                };
                match result {
                    Ok(label) => alert(&format!("Recognized: {}", label)),
                    Err(message) => alert(&message),
                }
            }
            "capture" => {
                let label = session.display_state().training_label;
                let result = if arg.is_empty() {
                    commands::add_training_example(&session, &label).await
                } else {
                    commands::add_training_still(&session, &label, arg).await
                };
                match result {
                    Ok(message) | Err(message) => alert(&message),
                }
            }
            "train" => {
                if training.as_ref().is_some_and(|t| !t.is_finished()) {
                    alert("Training is already in progress.");
                } else {
                    training = Some(spawn_training(session.clone()));
                }
            }
            "cancel" => match commands::cancel_training(&session) {
                Ok(message) | Err(message) => alert(&message),
            },
            "status" => {
                let display = session.display_state();
                alert(&format!(
                    "recognized: '{}', training label: '{}', buffered: {}, training: {}",
                    display.recognized_text,
                    display.training_label,
                    session.buffered_examples(),
                    session.is_training()
                ));
            }
            "help" => println!("{}", HELP),
            "quit" | "exit" => break,
            other => alert(&format!("Unknown command: {} (type 'help')", other)),
        }
    }

    if let Some(handle) = training {
        if !handle.is_finished() {
            session.cancel_training();
        }
        handle.await.ok();
    }
    Ok(())
}
