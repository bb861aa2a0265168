use cipherseek::{CipherParameters, Transformation, CHUNK_LEN};
use duct::cmd;
use std::io::prelude::*;

const INPUT_SIZES: &[usize] = &[
    0,
    1,
    15,
    16,
    17,
    40,
    CHUNK_LEN - 1,
    CHUNK_LEN,
    CHUNK_LEN + 1,
    2 * CHUNK_LEN + 1,
];

fn paint_input(input: &mut [u8]) {
    for i in 0..input.len() {
        // 251 is the largest prime that fits in a byte.
        input[i] = (i % 251) as u8;
    }
}

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_cipherseek")
}

#[test]
fn test_encrypt_decrypt() {
    for &size in INPUT_SIZES {
        dbg!(size);
        let mut input = vec![0; size];
        paint_input(&mut input);
        let keys = ["636f64696e6761666661697273636f6d", "zero"];
        for key in keys {
            dbg!(key);
            for use_hex in [true, false] {
                dbg!(use_hex);

                // Encrypt the input.
                let mut encrypt_args = vec!["encrypt", key];
                if use_hex {
                    encrypt_args.push("--hex");
                }
                let ciphertext = cmd(bin_path(), &encrypt_args)
                    .stdin_bytes(&input[..])
                    .stdout_capture()
                    .run()
                    .unwrap()
                    .stdout;

                // Decrypt the input and compare.
                let mut decrypt_args = vec!["decrypt", key];
                if use_hex {
                    decrypt_args.push("--hex");
                }
                let plaintext = cmd(bin_path(), &decrypt_args)
                    .stdin_bytes(&ciphertext[..])
                    .stdout_capture()
                    .run()
                    .unwrap()
                    .stdout;
                assert_eq!(input, plaintext);

                // Seek halfway through the input and compare again.
                let mut tmp = tempfile::NamedTempFile::new().unwrap();
                tmp.write_all(&ciphertext).unwrap();
                tmp.flush().unwrap();
                let seek_target = size / 2;
                dbg!(seek_target);
                let half_input = &input[seek_target..];
                let mut seek_args = decrypt_args.clone();
                let seek_flag = format!("--seek={}", seek_target);
                seek_args.push(&seek_flag);
                let path_string = tmp.path().to_str().expect("invalid uft8 tempfile path");
                seek_args.push(path_string);
                let half_plaintext = cmd(bin_path(), &seek_args)
                    .stdout_capture()
                    .run()
                    .unwrap()
                    .stdout;
                assert_eq!(half_input, half_plaintext);
            }
        }
    }
}

#[test]
fn test_hex_output_is_whole_blocks() {
    let output = cmd!(bin_path(), "encrypt", "zero", "--hex")
        .stdin_bytes(&b"hello world"[..])
        .stdout_capture()
        .run()
        .unwrap()
        .stdout;
    // One trailing newline, outside the hex.
    assert_eq!(output.last(), Some(&b'\n'));
    let hex_text = std::str::from_utf8(&output[..output.len() - 1]).unwrap();
    assert!(hex_text.bytes().all(|c| c.is_ascii_hexdigit()));
    // IV header plus one padded block.
    assert_eq!(hex_text.len(), 2 * 32);
}

#[test]
fn test_wrapped_hex_input() {
    let mut input = vec![0; 500];
    paint_input(&mut input);
    let params = CipherParameters::new(Transformation::default(), &[0; 16]).unwrap();
    let ciphertext = cipherseek::encrypt(&params, &input).unwrap();
    let mut wrapped = String::new();
    for line in hex::encode(&ciphertext).as_bytes().chunks(60) {
        wrapped.push_str(std::str::from_utf8(line).unwrap());
        wrapped.push_str("\r\n");
    }
    let plaintext = cmd!(bin_path(), "decrypt", "zero", "--hex", "--seek", "250")
        .stdin_bytes(wrapped)
        .stdout_capture()
        .run()
        .unwrap()
        .stdout;
    assert_eq!(&input[250..], &plaintext[..]);
}

#[test]
fn test_decrypt_library_output() {
    let mut input = vec![0; 1000];
    paint_input(&mut input);
    let params = CipherParameters::new(Transformation::default(), &[0; 16]).unwrap();
    let ciphertext = cipherseek::encrypt(&params, &input).unwrap();
    let plaintext = cmd!(bin_path(), "decrypt", "zero", "--seek", "123", "--length", "500")
        .stdin_bytes(ciphertext)
        .stdout_capture()
        .run()
        .unwrap()
        .stdout;
    assert_eq!(&input[123..623], &plaintext[..]);
}

#[test]
fn test_fixed_iv() {
    let mut input = vec![0; 300];
    paint_input(&mut input);
    let iv = "6c6f64696e6761666661697273636f66";
    let ciphertext = cmd!(bin_path(), "encrypt", "zero", "--fixed-iv", iv)
        .stdin_bytes(&input[..])
        .stdout_capture()
        .run()
        .unwrap()
        .stdout;
    // No header, just the padded ciphertext.
    assert_eq!(ciphertext.len(), 304);
    let plaintext = cmd!(bin_path(), "decrypt", "zero", "--fixed-iv", iv, "--seek", "77")
        .stdin_bytes(ciphertext)
        .stdout_capture()
        .run()
        .unwrap()
        .stdout;
    assert_eq!(&input[77..], &plaintext[..]);
}

#[test]
fn test_decryption_failure() {
    let params = CipherParameters::new(Transformation::default(), &[0; 16]).unwrap();
    let mut ciphertext = cipherseek::encrypt(&params, b"hello world").unwrap();
    // Chop off the last byte, leaving a partial block.
    ciphertext.pop();
    let status = cmd!(bin_path(), "decrypt", "zero")
        .stdin_bytes(ciphertext)
        .stderr_null()
        .stdout_null()
        .unchecked()
        .run()
        .unwrap()
        .status;
    assert!(!status.success());
}

#[test]
fn test_truncated_length_fails() {
    let params = CipherParameters::new(Transformation::default(), &[0; 16]).unwrap();
    let ciphertext = cipherseek::encrypt(&params, &[7; 50]).unwrap();
    let output = cmd!(bin_path(), "decrypt", "zero", "--length", "60")
        .stdin_bytes(ciphertext)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .unwrap();
    assert!(!output.status.success());
    assert_eq!(output.stdout, vec![7; 50]);
    assert!(String::from_utf8_lossy(&output.stderr).contains("truncated"));
}

#[test]
fn test_bad_key_length() {
    let status = cmd!(bin_path(), "encrypt", "abcd")
        .stdin_bytes(&b"x"[..])
        .stderr_null()
        .stdout_null()
        .unchecked()
        .run()
        .unwrap()
        .status;
    assert!(!status.success());
}
