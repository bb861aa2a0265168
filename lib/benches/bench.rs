#![feature(test)]

extern crate test;

use std::io::Cursor;

use cipherseek::{
    CipherParameters, DataSpec, DecryptingSession, ReaderUpstream, SessionConfig, Transformation,
};
use rand::prelude::*;
use test::Bencher;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

// This struct randomizes two things:
// 1. The actual bytes of input.
// 2. The page offset the input starts at.
pub struct RandomInput {
    buf: Vec<u8>,
    len: usize,
    offsets: Vec<usize>,
    offset_index: usize,
}

impl RandomInput {
    pub fn new(b: &mut Bencher, len: usize) -> Self {
        b.bytes += len as u64;
        let page_size: usize = page_size::get();
        let mut buf = vec![0u8; len + page_size];
        let mut rng = rand::rng();
        rng.fill_bytes(&mut buf);
        let mut offsets: Vec<usize> = (0..page_size).collect();
        offsets.shuffle(&mut rng);
        Self {
            buf,
            len,
            offsets,
            offset_index: 0,
        }
    }

    pub fn get(&mut self) -> &[u8] {
        let offset = self.offsets[self.offset_index];
        self.offset_index += 1;
        if self.offset_index >= self.offsets.len() {
            self.offset_index = 0;
        }
        &self.buf[offset..][..self.len]
    }
}

fn random_params() -> CipherParameters {
    let key: [u8; 16] = rand::random();
    CipherParameters::new(Transformation::default(), &key).unwrap()
}

fn bench_encrypt(b: &mut Bencher, size: usize) {
    let mut r = RandomInput::new(b, size);
    let params = random_params();
    b.iter(|| cipherseek::encrypt(&params, r.get()).unwrap());
}

#[bench]
fn bench_encrypt_bytes_01(b: &mut Bencher) {
    bench_encrypt(b, 1);
}

#[bench]
fn bench_encrypt_kib_01(b: &mut Bencher) {
    bench_encrypt(b, KIB);
}

#[bench]
fn bench_encrypt_kib_16(b: &mut Bencher) {
    bench_encrypt(b, 16 * KIB);
}

#[bench]
fn bench_encrypt_mib_1(b: &mut Bencher) {
    bench_encrypt(b, MIB);
}

fn bench_decrypt(b: &mut Bencher, size: usize) {
    let mut r = RandomInput::new(b, size);
    let params = random_params();
    let ciphertext = cipherseek::encrypt(&params, r.get()).unwrap();
    b.iter(|| cipherseek::decrypt(&params, &ciphertext).unwrap());
}

#[bench]
fn bench_decrypt_bytes_01(b: &mut Bencher) {
    bench_decrypt(b, 1);
}

#[bench]
fn bench_decrypt_kib_01(b: &mut Bencher) {
    bench_decrypt(b, KIB);
}

#[bench]
fn bench_decrypt_kib_16(b: &mut Bencher) {
    bench_decrypt(b, 16 * KIB);
}

#[bench]
fn bench_decrypt_mib_1(b: &mut Bencher) {
    bench_decrypt(b, MIB);
}

// Open near the end of a large file and read the last 1 KiB. Only the
// chaining block and the tail should get decrypted.
fn bench_seek_tail(b: &mut Bencher, size: usize) {
    let mut r = RandomInput::new(b, size);
    b.bytes = KIB as u64;
    let params = random_params();
    let ciphertext = cipherseek::encrypt(&params, r.get()).unwrap();
    let config = SessionConfig::new(params);
    let mut out = vec![0u8; KIB];
    b.iter(|| {
        let upstream = ReaderUpstream::new("bench", Cursor::new(&ciphertext[..]));
        let mut session = DecryptingSession::new(upstream, config.clone());
        session
            .open(DataSpec::at((size - KIB) as u64).with_length(KIB as u64))
            .unwrap();
        std::io::Read::read_exact(&mut session, &mut out).unwrap();
    });
}

#[bench]
fn bench_seek_tail_mib_1(b: &mut Bencher) {
    bench_seek_tail(b, MIB);
}

#[bench]
fn bench_seek_tail_mib_16(b: &mut Bencher) {
    bench_seek_tail(b, 16 * MIB);
}
