use anyhow::Result;
use console::style;
use nschat::confirm::ConfirmationStatus;
use nschat::models::message::Message;
use nschat::models::output::StreamKind;
use nschat::orchestrator::Orchestrator;
use std::time::Duration;

use crate::commands::{self, Command, HELP};

/// Interactive terminal front end for one orchestrator
pub struct Session {
    orchestrator: Orchestrator,
    /// Number of transcript messages already printed
    rendered: usize,
    /// Number of progress lines already printed for the current batch
    progress_rendered: usize,
}

impl Session {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Session {
            orchestrator,
            rendered: 0,
            progress_rendered: 0,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        println!(
            "nschat ({}) {}",
            self.orchestrator.model_name(),
            style("- type /? for help").dim()
        );
        self.render_new_messages();
        if !self.orchestrator.is_settled() {
            self.await_reply().await?;
        }

        loop {
            let line = match read_input().await {
                Ok(line) => line,
                // ctrl+c or ctrl+d at the prompt
                Err(_) => break,
            };
            match commands::parse(&line) {
                Command::Exit => break,
                Command::Empty => continue,
                Command::Help => println!("{}", HELP),
                Command::Message(text) => match self.orchestrator.submit_message(text) {
                    Ok(()) => self.await_reply().await?,
                    Err(e) => print_error(&e.to_string()),
                },
                Command::Retry => {
                    if self.orchestrator.status().completion_failed {
                        self.orchestrator.retry_completion();
                        self.await_reply().await?;
                    } else {
                        print_error("Nothing to retry");
                    }
                }
                Command::Undo => match self.orchestrator.back_up_and_erase_last_user_message() {
                    Some(text) => {
                        self.sync_rendered();
                        println!("{} {}", style("Erased:").dim(), text);
                    }
                    None => print_error("There is no message to erase"),
                },
                Command::Truncate(index) => match self.orchestrator.truncate_at(index) {
                    Ok(()) => self.sync_rendered(),
                    Err(e) => print_error(&e.to_string()),
                },
                Command::Clear => {
                    self.orchestrator.clear_messages();
                    self.sync_rendered();
                    println!("{}", style("Started a new conversation").dim());
                }
                Command::History => {
                    for (index, message) in self.orchestrator.chat().messages.iter().enumerate() {
                        print_message(index, message);
                    }
                }
                Command::Save(path) => match self.orchestrator.save_chat(&path) {
                    Ok(()) => println!("{} {}", style("Saved to").dim(), path.display()),
                    Err(e) => print_error(&e.to_string()),
                },
                Command::Load(path) => match self.orchestrator.load_chat(&path) {
                    Ok(()) => {
                        self.rendered = 0;
                        self.render_new_messages();
                        self.await_reply().await?;
                    }
                    Err(e) => print_error(&e.to_string()),
                },
                Command::Model(None) => println!("{}", self.orchestrator.model_name()),
                Command::Model(Some(model)) => {
                    self.orchestrator.set_model_name(model.as_str());
                    println!("{} {}", style("Switched to").dim(), model);
                }
                Command::Invalid(message) => print_error(&message),
            }
        }
        Ok(())
    }

    /// Follow the orchestrator until it needs the user again
    async fn await_reply(&mut self) -> Result<()> {
        let mut chat_rx = self.orchestrator.subscribe();
        let mut status_rx = self.orchestrator.subscribe_status();
        let mut gate_rx = self.orchestrator.subscribe_confirmation();
        self.progress_rendered = 0;

        loop {
            self.render_new_messages();
            self.render_progress();
            let gate = gate_rx.borrow_and_update().clone();
            if let ConfirmationStatus::Waiting { script } = gate {
                self.ask_confirmation(&script).await?;
                // the gate resets once the capability has seen the answer
                let _ = gate_rx.wait_for(|s| *s == ConfirmationStatus::None).await;
            }
            if self.orchestrator.is_settled() {
                break;
            }

            tokio::select! {
                _ = chat_rx.changed() => {}
                _ = status_rx.changed() => {}
                _ = gate_rx.changed() => {}
                _ = tokio::signal::ctrl_c() => self.interrupt(),
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }

        let status = self.orchestrator.status();
        if status.completion_failed {
            print_error("The assistant failed to reply. Type /retry to try again.");
        }
        if let Some(error) = status.last_batch_error {
            print_error(&format!("Tool calls could not run: {}", error));
        }
        Ok(())
    }

    fn interrupt(&mut self) {
        if self.orchestrator.cancel_script() {
            println!("{}", style("Interrupt: cancelling the running script...").yellow());
            return;
        }
        if self.orchestrator.reject_script() {
            return;
        }
        if let Some(text) = self.orchestrator.back_up_and_erase_last_user_message() {
            self.sync_rendered();
            println!(
                "{} {}",
                style("Interrupt: erased your last message:").yellow(),
                text
            );
        }
    }

    async fn ask_confirmation(&self, script: &str) -> Result<()> {
        println!("{}", style("The assistant wants to run this script:").cyan());
        println!("{}", style(script).dim());
        let approved = tokio::task::spawn_blocking(|| {
            cliclack::confirm("Run it?").initial_value(true).interact()
        })
        .await?
        .unwrap_or(false);
        if approved {
            self.orchestrator.confirm_script();
        } else {
            self.orchestrator.reject_script();
        }
        Ok(())
    }

    fn render_new_messages(&mut self) {
        let chat = self.orchestrator.chat();
        for (index, message) in chat.messages.iter().enumerate().skip(self.rendered) {
            print_message(index, message);
        }
        self.rendered = chat.messages.len();
    }

    fn render_progress(&mut self) {
        let progress = self.orchestrator.status().agent_progress;
        if progress.len() < self.progress_rendered {
            self.progress_rendered = 0;
        }
        for item in progress.iter().skip(self.progress_rendered) {
            let line = item.message.trim_end();
            match item.kind {
                StreamKind::Stdout => println!("{}", style(line).dim()),
                StreamKind::Stderr => println!("{}", style(line).red().dim()),
            }
        }
        self.progress_rendered = progress.len();
    }

    /// Forget printed messages that were truncated away
    fn sync_rendered(&mut self) {
        self.rendered = self.rendered.min(self.orchestrator.chat().messages.len());
    }
}

async fn read_input() -> Result<String> {
    let line = tokio::task::spawn_blocking(|| {
        cliclack::input("nschat>")
            .placeholder("")
            .interact::<String>()
    })
    .await??;
    Ok(line)
}

fn print_error(message: &str) {
    eprintln!("{}", style(message).red());
}

fn print_message(index: usize, message: &Message) {
    if let Some(text) = describe_message(index, message) {
        match message {
            Message::User { .. } => println!("{}", style(text).bold()),
            Message::Assistant { .. } => println!("{}", text),
            _ => println!("{}", style(text).dim()),
        }
    }
}

/// Plain text rendering of a transcript entry; system messages are hidden
pub fn describe_message(index: usize, message: &Message) -> Option<String> {
    let text = match message {
        Message::System { .. } => return None,
        Message::User { content } => format!("[{}] you: {}", index, content),
        Message::Assistant { .. } if message.has_tool_calls() => message
            .tool_calls()
            .iter()
            .map(|call| {
                format!(
                    "[{}] assistant calls {}({})",
                    index,
                    call.name(),
                    call.function.arguments
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Message::Assistant { content, .. } => {
            format!("[{}] assistant: {}", index, content.as_deref().unwrap_or_default())
        }
        Message::Tool { content, .. } => format!("[{}] tool: {}", index, content),
        Message::ClientSideOnly { content, .. } => format!("[{}] {}", index, content),
    };
    Some(text)
}
