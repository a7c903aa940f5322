//! LE legacy pairing toolbox: the security function `e`, the confirm value generator `c1` and the
//! short term key generator `s1` (Bluetooth Core Specification, Vol 3, Part H, 2.2).
//!
//! All values are little-endian byte arrays, the order in which they appear in SMP PDUs. AES
//! itself works on big-endian blocks, so [`e`] swaps on the way in and out.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

/// Returns 16 random bytes for use as a pairing nonce.
pub fn r() -> [u8; 16] {
    rand::random()
}

/// Security function `e`: AES-128 encryption of `data` with `key`.
pub fn e(key: &[u8; 16], data: &[u8; 16]) -> [u8; 16] {
    let mut swapped_key = *key;
    swapped_key.reverse();
    let mut block = *data;
    block.reverse();

    let cipher = Aes128::new(GenericArray::from_slice(&swapped_key));
    let mut block: aes::Block = GenericArray::from(block);
    cipher.encrypt_block(&mut block);

    let mut result = [0; 16];
    result.copy_from_slice(&block);
    result.reverse();
    result
}

/// Confirm value generation function `c1`.
///
/// `iat`/`rat` are the initiating and responding address types, `ia`/`ra` the matching addresses
/// in wire order. `preq` and `pres` are the complete pairing request and response PDUs.
#[allow(clippy::too_many_arguments)]
pub fn c1(
    k: &[u8; 16],
    r: &[u8; 16],
    pres: &[u8; 7],
    preq: &[u8; 7],
    iat: u8,
    ia: &[u8; 6],
    rat: u8,
    ra: &[u8; 6],
) -> [u8; 16] {
    let mut p1 = [0; 16];
    p1[0] = iat;
    p1[1] = rat;
    p1[2..9].copy_from_slice(preq);
    p1[9..16].copy_from_slice(pres);

    let mut p2 = [0; 16];
    p2[0..6].copy_from_slice(ra);
    p2[6..12].copy_from_slice(ia);

    let mut block = xor(r, &p1);
    block = e(k, &block);
    block = xor(&block, &p2);
    e(k, &block)
}

/// Key generation function `s1`: derives the STK from the least significant halves of `r1` and
/// `r2`, each of which must hold at least 8 bytes.
pub fn s1(k: &[u8; 16], r1: &[u8], r2: &[u8]) -> [u8; 16] {
    let mut r = [0; 16];
    r[0..8].copy_from_slice(&r2[0..8]);
    r[8..16].copy_from_slice(&r1[0..8]);

    e(k, &r)
}

fn xor(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0; 16];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}
