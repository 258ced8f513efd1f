use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::errors::PersistError;
use crate::models::chat::Chat;

/// File extension used for saved chats
pub const CHAT_FILE_EXTENSION: &str = "nschat";

pub fn serialize_chat(chat: &Chat) -> Result<String, PersistError> {
    Ok(serde_json::to_string_pretty(chat)?)
}

pub fn deserialize_chat(data: &str) -> Result<Chat, PersistError> {
    Ok(serde_json::from_str(data)?)
}

/// Write the chat as pretty printed JSON, creating parent directories
pub fn save_chat(path: &Path, chat: &Chat) -> Result<(), PersistError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, chat)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

pub fn load_chat(path: &Path) -> Result<Chat, PersistError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::{Message, ToolCallRequest};
    use serde_json::json;

    fn sample_chat() -> Chat {
        let call = ToolCallRequest::new("call_1", "compute_script", &json!({"script": "1/0"}));
        let other = ToolCallRequest::new("call_2", "figure_script", &json!({"script": "plt.show()"}));
        let mut chat = Chat::new(vec![
            Message::user("plot something"),
            Message::assistant_tool_calls(None, vec![call, other]),
            Message::tool("call_1", "Error: division by zero"),
            Message::tool("call_2", "![image](image://image_1.png)"),
            Message::client_side_only("saved locally"),
            Message::assistant("Here is the plot."),
        ]);
        chat.files
            .insert("image_1.png".into(), "base64:iVBORw0KGgo=".into());
        chat
    }

    #[test]
    fn test_round_trip_empty_chat() {
        let chat = Chat::default();
        let data = serialize_chat(&chat).unwrap();
        assert_eq!(deserialize_chat(&data).unwrap(), chat);
    }

    #[test]
    fn test_round_trip_with_tool_responses() {
        let chat = sample_chat();
        let data = serialize_chat(&chat).unwrap();
        assert_eq!(deserialize_chat(&data).unwrap(), chat);
    }

    #[test]
    fn test_snapshot_shape() {
        let value: serde_json::Value =
            serde_json::from_str(&serialize_chat(&sample_chat()).unwrap()).unwrap();
        assert_eq!(value["messages"][0], json!({"role": "user", "content": "plot something"}));
        assert_eq!(value["messages"][2]["tool_call_id"], "call_1");
        assert_eq!(value["files"]["image_1.png"], "base64:iVBORw0KGgo=");
    }

    #[test]
    fn test_missing_files_field_defaults() {
        let chat = deserialize_chat(r#"{"messages": [{"role": "user", "content": "hi"}]}"#).unwrap();
        assert_eq!(chat.messages, vec![Message::user("hi")]);
        assert!(chat.files.is_empty());
    }

    #[test]
    fn test_invalid_document() {
        assert!(matches!(
            deserialize_chat("{\"messages\": 3}"),
            Err(PersistError::Json(_))
        ));
    }

    #[test]
    fn test_save_and_load_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("chat.nschat");
        let chat = sample_chat();

        save_chat(&path, &chat).unwrap();
        assert_eq!(load_chat(&path).unwrap(), chat);

        temp_dir.close().unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_chat(&temp_dir.path().join("absent.nschat")),
            Err(PersistError::Io(_))
        ));
    }
}
