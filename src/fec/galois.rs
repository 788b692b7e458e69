// GF(2^8) arithmetic over the 0x11D reduction polynomial

use crate::common::error::{Error, Result};

pub const PRIMITIVE_POLY: u16 = 0x11D;
/// Multiplicative group order
pub const FIELD_ORDER: usize = 255;

struct Tables {
    /// exp[i] = α^i, doubled so log sums need no reduction
    exp: [u8; 512],
    log: [u8; 256],
}

const fn build_tables() -> Tables {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < FIELD_ORDER {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= PRIMITIVE_POLY;
        }
        i += 1;
    }
    while i < 512 {
        exp[i] = exp[i - FIELD_ORDER];
        i += 1;
    }
    Tables { exp, log }
}

static TABLES: Tables = build_tables();

#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Subtraction is the same as addition in characteristic 2
#[inline]
pub fn sub(a: u8, b: u8) -> u8 {
    a ^ b
}

#[inline]
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    TABLES.exp[TABLES.log[a as usize] as usize + TABLES.log[b as usize] as usize]
}

pub fn div(a: u8, b: u8) -> Result<u8> {
    if b == 0 {
        return Err(Error::Galois(format!("division of {} by zero", a)));
    }
    if a == 0 {
        return Ok(0);
    }
    let idx = TABLES.log[a as usize] as usize + FIELD_ORDER - TABLES.log[b as usize] as usize;
    Ok(TABLES.exp[idx])
}

pub fn inv(a: u8) -> Result<u8> {
    div(1, a)
}

/// α^n
#[inline]
pub fn exp(n: usize) -> u8 {
    TABLES.exp[n % FIELD_ORDER]
}

pub fn pow(a: u8, n: usize) -> u8 {
    if n == 0 {
        return 1;
    }
    if a == 0 {
        return 0;
    }
    exp(TABLES.log[a as usize] as usize * n)
}

/// Multiply-accumulate a whole row: `acc[i] ^= coeff * src[i]`
pub fn mul_add_slice(coeff: u8, src: &[u8], acc: &mut [u8]) {
    if coeff == 0 {
        return;
    }
    let log_c = TABLES.log[coeff as usize] as usize;
    for (a, &s) in acc.iter_mut().zip(src) {
        if s != 0 {
            *a ^= TABLES.exp[log_c + TABLES.log[s as usize] as usize];
        }
    }
}
