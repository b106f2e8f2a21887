fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chunkyard_protocol::constants::{
        CODE_OK, DEFAULT_CHUNK_SIZE, ERR_CODE_CONFLICT, MessageType,
    };
    use chunkyard_protocol::{
        BinaryHeader, Envelope, MergedFile, Message, ServerInfo, UploadAlreadyRequest,
        UploadAlreadyResponse, UploadBase64Request, UploadMergeRequest, UploadedFile,
        encode_binary_message, parse_binary_message,
    };

    const HASH: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Reads a fixture file as text.
    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (key order is irrelevant to `Value` equality).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        // Parsed from text: `RawValue` payloads cannot come from a `Value`.
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    /// Extracts `field` from a fixture and deserializes it as `T`.
    fn fixture_field<T: serde::de::DeserializeOwned>(name: &str, field: &str) -> T {
        let fixture = load_fixture(name);
        serde_json::from_value(fixture[field].clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}.{field}: {e}"))
    }

    // --- Requests ---

    #[test]
    fn fixture_upload_already_request() {
        let msg: Message = roundtrip_test("upload_already_request.json");
        assert_eq!(msg.msg_type, MessageType::UploadAlready);

        let req: UploadAlreadyRequest = msg.parse_payload().unwrap().unwrap();
        assert_eq!(req.hash, HASH);
    }

    #[test]
    fn fixture_upload_merge_request() {
        let msg: Message = roundtrip_test("upload_merge_request.json");
        assert_eq!(msg.msg_type, MessageType::UploadMerge);

        let req: UploadMergeRequest = msg.parse_payload().unwrap().unwrap();
        assert_eq!(req.hash, HASH);
        assert_eq!(req.count, 12);
    }

    #[test]
    fn fixture_upload_base64_request() {
        let msg: Message = roundtrip_test("upload_base64_request.json");
        assert_eq!(msg.msg_type, MessageType::UploadBase64);

        let req: UploadBase64Request = msg.parse_payload().unwrap().unwrap();
        assert_eq!(req.filename, "hello.txt");
        assert_eq!(req.decode().unwrap(), b"hello");
    }

    #[test]
    fn built_request_matches_fixture() {
        let fixture = load_fixture("upload_merge_request.json");
        let req = UploadMergeRequest {
            hash: HASH.into(),
            count: 12,
        };
        let msg = Message::new(
            "5f0e2a8c-1d34-4b6e-8f7a-2c9d1e0b3a47",
            MessageType::UploadMerge,
            Some(&req),
        )
        .unwrap();

        assert_eq!(serde_json::to_value(&msg).unwrap(), fixture);
    }

    #[test]
    fn fixture_binary_chunk_header() {
        let header: BinaryHeader = roundtrip_test("binary_chunk_header.json");
        assert_eq!(header.msg_type, MessageType::UploadChunk);
        assert_eq!(header.filename, format!("{HASH}_3.mp4"));

        let frame = encode_binary_message(&header, b"chunk bytes").unwrap();
        let header_len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        let header_json: serde_json::Value =
            serde_json::from_slice(&frame[4..4 + header_len]).unwrap();
        assert_eq!(header_json, load_fixture("binary_chunk_header.json"));

        let parsed = parse_binary_message(&frame).unwrap();
        assert_eq!(parsed.header.id, header.id);
        assert_eq!(parsed.data, b"chunk bytes");
    }

    #[test]
    fn unknown_request_type_still_parses() {
        let raw = r#"{"id":"x","type":"upload_resume","payload":{}}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.msg_type, MessageType::Unknown);
    }

    // --- Responses ---

    #[test]
    fn fixture_probe_response() {
        let env: Envelope = roundtrip_test("probe_response.json");
        assert!(env.success);
        assert_eq!(env.code, CODE_OK);

        let data: UploadAlreadyResponse = env.parse_data().unwrap().unwrap();
        assert_eq!(data.file_list, vec![format!("{HASH}_0.mp4"), format!("{HASH}_1.mp4")]);
        assert_eq!(data, fixture_field("probe_response.json", "data"));
    }

    #[test]
    fn fixture_chunk_response() {
        let env: Envelope = roundtrip_test("chunk_response.json");
        let data: UploadedFile = env.parse_data().unwrap().unwrap();
        assert_eq!(data.original_filename, format!("{HASH}_3.mp4"));
        assert!(data.service_path.ends_with(&format!("{HASH}/{HASH}_3.mp4")));
    }

    #[test]
    fn fixture_merge_response() {
        let env: Envelope = roundtrip_test("merge_response.json");
        let data: MergedFile = env.parse_data().unwrap().unwrap();
        assert_eq!(data.code_text, "merge success");
        assert_eq!(data.original_filename, format!("{HASH}.mp4"));
    }

    #[test]
    fn built_merge_reply_matches_fixture() {
        let fixture = load_fixture("merge_response.json");
        let data: MergedFile = fixture_field("merge_response.json", "data");
        let env =
            Envelope::success("5f0e2a8c-1d34-4b6e-8f7a-2c9d1e0b3a47", "success", Some(&data))
                .unwrap();

        assert_eq!(serde_json::to_value(&env).unwrap(), fixture);
    }

    #[test]
    fn fixture_ping_response() {
        let env: Envelope = roundtrip_test("ping_response.json");
        assert_eq!(env.message, "pong");
        let info: ServerInfo = env.parse_data().unwrap().unwrap();
        assert_eq!(info.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn fixture_failure_response() {
        let env: Envelope = roundtrip_test("failure_response.json");
        assert!(!env.success);
        assert_eq!(env.code, ERR_CODE_CONFLICT);
        assert!(env.data.is_none());

        let built = Envelope::failure(
            "e1f2a3b4-c5d6-4e7f-8a9b-0c1d2e3f4a5b",
            ERR_CODE_CONFLICT,
            format!("chunk already exists: {HASH}_3.mp4"),
        );
        assert_eq!(
            serde_json::to_value(&built).unwrap(),
            load_fixture("failure_response.json")
        );
    }

    #[test]
    fn all_fixtures_are_valid_json() {
        let entries = fs::read_dir(fixtures_dir()).expect("fixtures directory exists");
        let mut count = 0;
        for entry in entries {
            let path = entry.unwrap().path();
            if path.extension().is_some_and(|e| e == "json") {
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                load_fixture(&name);
                count += 1;
            }
        }
        assert!(count >= 9, "expected at least 9 fixtures, found {count}");
    }
}
