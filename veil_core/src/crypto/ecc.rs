//! ECDH over short-Weierstrass NIST curves: secp128r1, secp192r1,
//! secp256r1, secp384r1, selected by coordinate byte length.
//!
//! Big integers are little-endian 64-bit limb arrays with u128 products.
//! Scalar multiplication is Montgomery's ladder with co-Z coordinates
//! (Goundar/Joye/Miyaji/Rivain/Venelli, eprint 2011/338), which shares one
//! Z between the ladder pair and recovers it with a single inversion at
//! the end. Reductions use the curve-specific fast shapes: the NIST
//! algorithm-5/6 folds for 128/192/256 and the omega-multiply loop for 384.

use crate::error::{Error, ErrorCode, Result};
use crate::prng::Prng;

/// secp384r1 needs the most limbs.
const MAX_DIGITS: usize = 6;
const MAX_TRIES: usize = 16;

type Limbs = [u64; MAX_DIGITS];
type WideLimbs = [u64; 2 * MAX_DIGITS];

#[derive(Clone, Copy)]
struct Point {
    x: Limbs,
    y: Limbs,
}

struct CurveParams {
    p: Limbs,
    b: Limbs,
    gx: Limbs,
    gy: Limbs,
    n: Limbs,
}

const SECP128R1: CurveParams = CurveParams {
    p: [0xFFFFFFFFFFFFFFFF, 0xFFFFFFFDFFFFFFFF, 0, 0, 0, 0],
    b: [0xD824993C2CEE5ED3, 0xE87579C11079F43D, 0, 0, 0, 0],
    gx: [0x0C28607CA52C5B86, 0x161FF7528B899B2D, 0, 0, 0, 0],
    gy: [0xC02DA292DDED7A83, 0xCF5AC8395BAFEB13, 0, 0, 0, 0],
    n: [0x75A30D1B9038A115, 0xFFFFFFFE00000000, 0, 0, 0, 0],
};

const SECP192R1: CurveParams = CurveParams {
    p: [0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFE, 0xFFFFFFFFFFFFFFFF, 0, 0, 0],
    b: [0xFEB8DEECC146B9B1, 0x0FA7E9AB72243049, 0x64210519E59C80E7, 0, 0, 0],
    gx: [0xF4FF0AFD82FF1012, 0x7CBF20EB43A18800, 0x188DA80EB03090F6, 0, 0, 0],
    gy: [0x73F977A11E794811, 0x631011ED6B24CDD5, 0x07192B95FFC8DA78, 0, 0, 0],
    n: [0x146BC9B1B4D22831, 0xFFFFFFFF99DEF836, 0xFFFFFFFFFFFFFFFF, 0, 0, 0],
};

const SECP256R1: CurveParams = CurveParams {
    p: [0xFFFFFFFFFFFFFFFF, 0x00000000FFFFFFFF, 0x0000000000000000, 0xFFFFFFFF00000001, 0, 0],
    b: [0x3BCE3C3E27D2604B, 0x651D06B0CC53B0F6, 0xB3EBBD55769886BC, 0x5AC635D8AA3A93E7, 0, 0],
    gx: [0xF4A13945D898C296, 0x77037D812DEB33A0, 0xF8BCE6E563A440F2, 0x6B17D1F2E12C4247, 0, 0],
    gy: [0xCBB6406837BF51F5, 0x2BCE33576B315ECE, 0x8EE7EB4A7C0F9E16, 0x4FE342E2FE1A7F9B, 0, 0],
    n: [0xF3B9CAC2FC632551, 0xBCE6FAADA7179E84, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFF00000000, 0, 0],
};

const SECP384R1: CurveParams = CurveParams {
    p: [
        0x00000000FFFFFFFF, 0xFFFFFFFF00000000, 0xFFFFFFFFFFFFFFFE,
        0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF,
    ],
    b: [
        0x2A85C8EDD3EC2AEF, 0xC656398D8A2ED19D, 0x0314088F5013875A,
        0x181D9C6EFE814112, 0x988E056BE3F82D19, 0xB3312FA7E23EE7E4,
    ],
    gx: [
        0x3A545E3872760AB7, 0x5502F25DBF55296C, 0x59F741E082542A38,
        0x6E1D3B628BA79B98, 0x8EB1C71EF320AD74, 0xAA87CA22BE8B0537,
    ],
    gy: [
        0x7A431D7C90EA0E5F, 0x0A60B1CE1D7E819D, 0xE9DA3113B5F0B8C0,
        0xF8F41DBD289A147C, 0x5D9E98BF9292DC29, 0x3617DE4A96262C6F,
    ],
    n: [
        0xECEC196ACCC52973, 0x581A0DB248B0A77A, 0xC7634D81F4372DDF,
        0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF, 0xFFFFFFFFFFFFFFFF,
    ],
};

fn params_for(bytes: usize) -> Option<&'static CurveParams> {
    match bytes {
        16 => Some(&SECP128R1),
        24 => Some(&SECP192R1),
        32 => Some(&SECP256R1),
        48 => Some(&SECP384R1),
        _ => None,
    }
}

/// One ECDH keypair on one curve.
pub struct Ecc {
    bytes: usize,
    digits: usize,
    p: Limbs,
    n: Limbs,
    g: Point,
    private_key: Limbs,
    public_key: Point,
}

impl Ecc {
    /// Loads the curve selected by coordinate byte length and generates a
    /// keypair: a uniform scalar in `[1, n-1]` (at most 16 resampling
    /// attempts) and its public point `d*G`.
    pub fn generate(bytes: usize, prng: &mut Prng) -> Result<Ecc> {
        let params = params_for(bytes).ok_or(Error::internal(ErrorCode::EccInitFailedCurve))?;
        let mut ecc = Ecc {
            bytes,
            digits: bytes / 8,
            p: params.p,
            n: params.n,
            g: Point { x: params.gx, y: params.gy },
            private_key: [0; MAX_DIGITS],
            public_key: Point { x: [0; MAX_DIGITS], y: [0; MAX_DIGITS] },
        };

        let mut tries = 0;
        loop {
            if tries >= MAX_TRIES {
                return Err(Error::internal(ErrorCode::EccInitFailedMaxTries));
            }
            tries += 1;

            let mut raw = [0u8; MAX_DIGITS * 8];
            prng.fill_bytes(&mut raw[..ecc.digits * 8])
                .map_err(|_| Error::internal(ErrorCode::EccInitFailedRandom))?;
            for (limb, chunk) in ecc.private_key.iter_mut().zip(raw.chunks_exact(8)) {
                *limb = u64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ]);
            }
            for limb in ecc.private_key.iter_mut().skip(ecc.digits) {
                *limb = 0;
            }

            if ecc.is_zero(&ecc.private_key) {
                continue;
            }
            // Bring the scalar into [1, n-1]; one subtraction suffices for
            // these curves.
            if ecc.cmp(&ecc.n, &ecc.private_key) != core::cmp::Ordering::Greater {
                let n = ecc.n;
                let mut d = ecc.private_key;
                ecc.sub_assign(&mut d, &n);
                ecc.private_key = d;
            }

            let d = ecc.private_key;
            let g = ecc.g;
            ecc.public_key = ecc.mult_point(&g, &d, None);
            if !ecc.point_is_zero(&ecc.public_key) {
                return Ok(ecc);
            }
        }
    }

    pub fn curve_bytes(&self) -> usize {
        self.bytes
    }

    /// Writes the SEC1 uncompressed form `04 || X || Y`. Returns the byte
    /// count written.
    pub fn export_public_key(&self, out: &mut [u8]) -> Result<usize> {
        let needed = self.bytes * 2 + 1;
        if out.len() < needed {
            return Err(Error::internal(ErrorCode::EccExportFailedBufferTooSmall));
        }
        out[0] = 0x04;
        self.native_to_bytes(&mut out[1..1 + self.bytes], &self.public_key.x);
        self.native_to_bytes(&mut out[1 + self.bytes..needed], &self.public_key.y);
        Ok(needed)
    }

    /// ECDH: writes the X coordinate of `d * peer` into `secret`.
    /// The ladder runs with a random initial Z to blind the fixed input.
    pub fn compute_shared_secret(
        &self,
        peer_public_key: &[u8],
        secret: &mut [u8],
        prng: &mut Prng,
    ) -> Result<()> {
        if peer_public_key.len() != self.bytes * 2 + 1
            || peer_public_key[0] != 0x04
            || secret.len() < self.bytes
        {
            return Err(Error::internal(ErrorCode::EccSharedFailedFormat));
        }

        let peer = Point {
            x: self.bytes_to_native(&peer_public_key[1..1 + self.bytes]),
            y: self.bytes_to_native(&peer_public_key[1 + self.bytes..]),
        };

        let mut initial_z = [0u64; MAX_DIGITS];
        let mut raw = [0u8; MAX_DIGITS * 8];
        for _ in 0..MAX_TRIES {
            prng.fill_bytes(&mut raw[..self.digits * 8])
                .map_err(|_| Error::internal(ErrorCode::EccSharedFailedRandom))?;
            for (limb, chunk) in initial_z.iter_mut().zip(raw.chunks_exact(8)) {
                *limb = u64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ]);
            }
            for limb in initial_z.iter_mut().skip(self.digits) {
                *limb = 0;
            }
            if !self.is_zero(&initial_z) {
                break;
            }
        }
        if self.is_zero(&initial_z) {
            return Err(Error::internal(ErrorCode::EccSharedFailedRandom));
        }

        let product = self.mult_point(&peer, &self.private_key, Some(&initial_z));
        if self.point_is_zero(&product) {
            return Err(Error::internal(ErrorCode::EccSharedFailedIdentity));
        }
        self.native_to_bytes(&mut secret[..self.bytes], &product.x);
        Ok(())
    }

    // ---- big-integer helpers (little-endian limbs, self.digits wide) ----

    fn is_zero(&self, v: &Limbs) -> bool {
        v[..self.digits].iter().all(|&limb| limb == 0)
    }

    fn test_bit(v: &Limbs, bit: u32) -> bool {
        v[(bit >> 6) as usize] & (1u64 << (bit & 63)) != 0
    }

    fn num_digits(&self, v: &Limbs) -> usize {
        (0..self.digits).rev().find(|&i| v[i] != 0).map_or(0, |i| i + 1)
    }

    fn num_bits(&self, v: &Limbs) -> u32 {
        let digits = self.num_digits(v);
        if digits == 0 {
            return 0;
        }
        (digits as u32 - 1) * 64 + (64 - v[digits - 1].leading_zeros())
    }

    fn cmp(&self, left: &Limbs, right: &Limbs) -> core::cmp::Ordering {
        for i in (0..self.digits).rev() {
            match left[i].cmp(&right[i]) {
                core::cmp::Ordering::Equal => continue,
                other => return other,
            }
        }
        core::cmp::Ordering::Equal
    }

    /// acc += rhs over the active limbs, returning the carry out.
    fn add_assign(&self, acc: &mut Limbs, rhs: &Limbs) -> u64 {
        let mut carry = 0u64;
        for i in 0..self.digits {
            let (sum, over1) = acc[i].overflowing_add(rhs[i]);
            let (sum, over2) = sum.overflowing_add(carry);
            acc[i] = sum;
            carry = (over1 | over2) as u64;
        }
        carry
    }

    /// acc -= rhs over the active limbs, returning the borrow out.
    fn sub_assign(&self, acc: &mut Limbs, rhs: &Limbs) -> u64 {
        let mut borrow = 0u64;
        for i in 0..self.digits {
            let (diff, under1) = acc[i].overflowing_sub(rhs[i]);
            let (diff, under2) = diff.overflowing_sub(borrow);
            acc[i] = diff;
            borrow = (under1 | under2) as u64;
        }
        borrow
    }

    fn lshift(&self, input: &Limbs, shift: u32) -> (Limbs, u64) {
        let mut out = [0u64; MAX_DIGITS];
        let mut carry = 0u64;
        for i in 0..self.digits {
            out[i] = (input[i] << shift) | carry;
            carry = input[i] >> (64 - shift);
        }
        (out, carry)
    }

    fn rshift1(&self, v: &mut Limbs) {
        let mut carry = 0u64;
        for i in (0..self.digits).rev() {
            let limb = v[i];
            v[i] = (limb >> 1) | carry;
            carry = limb << 63;
        }
    }

    /// Schoolbook product into 2*digits limbs, column by column with a
    /// (u128, u64) running accumulator.
    fn mult(&self, left: &Limbs, right: &Limbs) -> WideLimbs {
        let mut result = [0u64; 2 * MAX_DIGITS];
        let mut acc: u128 = 0;
        let mut acc_top: u64 = 0;
        for k in 0..self.digits * 2 - 1 {
            let low = if k < self.digits { 0 } else { k + 1 - self.digits };
            for i in low..=k.min(self.digits - 1) {
                let product = (left[i] as u128) * (right[k - i] as u128);
                let (sum, overflow) = acc.overflowing_add(product);
                acc = sum;
                acc_top += overflow as u64;
            }
            result[k] = acc as u64;
            acc = (acc >> 64) | ((acc_top as u128) << 64);
            acc_top = 0;
        }
        result[self.digits * 2 - 1] = acc as u64;
        result
    }

    fn square(&self, left: &Limbs) -> WideLimbs {
        let mut result = [0u64; 2 * MAX_DIGITS];
        let mut acc: u128 = 0;
        let mut acc_top: u64 = 0;
        for k in 0..self.digits * 2 - 1 {
            let low = if k < self.digits { 0 } else { k + 1 - self.digits };
            for i in low..=k.min(self.digits - 1) {
                if i > k - i {
                    break;
                }
                let mut product = (left[i] as u128) * (left[k - i] as u128);
                if i < k - i {
                    acc_top += (product >> 127) as u64;
                    product <<= 1;
                }
                let (sum, overflow) = acc.overflowing_add(product);
                acc = sum;
                acc_top += overflow as u64;
            }
            result[k] = acc as u64;
            acc = (acc >> 64) | ((acc_top as u128) << 64);
            acc_top = 0;
        }
        result[self.digits * 2 - 1] = acc as u64;
        result
    }

    /// (left + right) mod m; assumes both inputs are below m.
    fn mod_add(&self, left: &Limbs, right: &Limbs, modulus: &Limbs) -> Limbs {
        let mut result = *left;
        let carry = self.add_assign(&mut result, right);
        if carry != 0 || self.cmp(&result, modulus) != core::cmp::Ordering::Less {
            self.sub_assign(&mut result, modulus);
        }
        result
    }

    /// (left - right) mod m; assumes both inputs are below m.
    fn mod_sub(&self, left: &Limbs, right: &Limbs, modulus: &Limbs) -> Limbs {
        let mut result = *left;
        if self.sub_assign(&mut result, right) != 0 {
            self.add_assign(&mut result, modulus);
        }
        result
    }

    // Fast reduction of a double-width product, one shape per curve.
    // The 128/192/256 folds follow the standard NIST algorithm-5/6 term
    // splits; 384 repeatedly folds the high half through
    // omega = 2^128 + 2^96 - 2^32 + 1.

    fn mmod_fast(&self, product: &WideLimbs) -> Limbs {
        match self.bytes {
            16 => self.mmod_fast_128(product),
            24 => self.mmod_fast_192(product),
            32 => self.mmod_fast_256(product),
            _ => self.mmod_fast_384(product),
        }
    }

    fn mmod_fast_128(&self, product: &WideLimbs) -> Limbs {
        let mut result = [0u64; MAX_DIGITS];
        result[..2].copy_from_slice(&product[..2]);
        let mut carry: i64 = 0;
        let mut tmp = [0u64; MAX_DIGITS];

        tmp[0] = product[2];
        tmp[1] = (product[3] & 0x1FFFFFFFF) | (product[2] << 33);
        carry += self.add_assign(&mut result, &tmp) as i64;

        tmp[0] = (product[2] >> 31) | (product[3] << 33);
        tmp[1] = (product[3] >> 31) | ((product[2] & 0xFFFFFFFF80000000) << 2);
        carry += self.add_assign(&mut result, &tmp) as i64;

        tmp[0] = (product[2] >> 62) | (product[3] << 2);
        tmp[1] = (product[3] >> 62) | ((product[2] & 0xC000000000000000) >> 29) | (product[3] << 35);
        carry += self.add_assign(&mut result, &tmp) as i64;

        tmp[0] = product[3] >> 29;
        tmp[1] = (product[3] & 0xFFFFFFFFE0000000) << 4;
        carry += self.add_assign(&mut result, &tmp) as i64;

        tmp[0] = product[3] >> 60;
        tmp[1] = product[3] & 0xFFFFFFFE00000000;
        carry += self.add_assign(&mut result, &tmp) as i64;

        tmp[0] = 0;
        tmp[1] = (product[3] & 0xF000000000000000) >> 27;
        carry += self.add_assign(&mut result, &tmp) as i64;

        let p = self.p;
        while carry != 0 || self.cmp(&p, &result) != core::cmp::Ordering::Greater {
            carry -= self.sub_assign(&mut result, &p) as i64;
        }
        result
    }

    fn mmod_fast_192(&self, product: &WideLimbs) -> Limbs {
        let mut result = [0u64; MAX_DIGITS];
        result[..3].copy_from_slice(&product[..3]);
        let mut carry: i64 = 0;
        let mut tmp = [0u64; MAX_DIGITS];

        tmp[..3].copy_from_slice(&product[3..6]);
        carry += self.add_assign(&mut result, &tmp) as i64;

        tmp[0] = 0;
        tmp[1] = product[3];
        tmp[2] = product[4];
        carry += self.add_assign(&mut result, &tmp) as i64;

        tmp[0] = product[5];
        tmp[1] = product[5];
        tmp[2] = 0;
        carry += self.add_assign(&mut result, &tmp) as i64;

        let p = self.p;
        while carry != 0 || self.cmp(&p, &result) != core::cmp::Ordering::Greater {
            carry -= self.sub_assign(&mut result, &p) as i64;
        }
        result
    }

    fn mmod_fast_256(&self, product: &WideLimbs) -> Limbs {
        let mut result = [0u64; MAX_DIGITS];
        result[..4].copy_from_slice(&product[..4]);
        let mut carry: i64;
        let mut tmp = [0u64; MAX_DIGITS];

        // s1
        tmp[0] = 0;
        tmp[1] = product[5] & 0xFFFFFFFF00000000;
        tmp[2] = product[6];
        tmp[3] = product[7];
        let (shifted, c) = self.lshift(&tmp, 1);
        carry = c as i64;
        carry += self.add_assign(&mut result, &shifted) as i64;

        // s2
        tmp[1] = product[6] << 32;
        tmp[2] = (product[6] >> 32) | (product[7] << 32);
        tmp[3] = product[7] >> 32;
        let (shifted, c) = self.lshift(&tmp, 1);
        carry += c as i64;
        carry += self.add_assign(&mut result, &shifted) as i64;

        // s3
        tmp[0] = product[4];
        tmp[1] = product[5] & 0xFFFFFFFF;
        tmp[2] = 0;
        tmp[3] = product[7];
        carry += self.add_assign(&mut result, &tmp) as i64;

        // s4
        tmp[0] = (product[4] >> 32) | (product[5] << 32);
        tmp[1] = (product[5] >> 32) | (product[6] & 0xFFFFFFFF00000000);
        tmp[2] = product[7];
        tmp[3] = (product[6] >> 32) | (product[4] << 32);
        carry += self.add_assign(&mut result, &tmp) as i64;

        // d1
        tmp[0] = (product[5] >> 32) | (product[6] << 32);
        tmp[1] = product[6] >> 32;
        tmp[2] = 0;
        tmp[3] = (product[4] & 0xFFFFFFFF) | (product[5] << 32);
        carry -= self.sub_assign(&mut result, &tmp) as i64;

        // d2
        tmp[0] = product[6];
        tmp[1] = product[7];
        tmp[2] = 0;
        tmp[3] = (product[4] >> 32) | (product[5] & 0xFFFFFFFF00000000);
        carry -= self.sub_assign(&mut result, &tmp) as i64;

        // d3
        tmp[0] = (product[6] >> 32) | (product[7] << 32);
        tmp[1] = (product[7] >> 32) | (product[4] << 32);
        tmp[2] = (product[4] >> 32) | (product[5] << 32);
        tmp[3] = product[6] << 32;
        carry -= self.sub_assign(&mut result, &tmp) as i64;

        // d4
        tmp[0] = product[7];
        tmp[1] = product[4] & 0xFFFFFFFF00000000;
        tmp[2] = product[5];
        tmp[3] = product[6] & 0xFFFFFFFF00000000;
        carry -= self.sub_assign(&mut result, &tmp) as i64;

        let p = self.p;
        if carry < 0 {
            while carry < 0 {
                carry += self.add_assign(&mut result, &p) as i64;
            }
        } else {
            while carry != 0 || self.cmp(&p, &result) != core::cmp::Ordering::Greater {
                carry -= self.sub_assign(&mut result, &p) as i64;
            }
        }
        result
    }

    /// result = right * (2^128 + 2^96 - 2^32 + 1), spilling into
    /// digits + 3 limbs.
    fn omega_mult_384(&self, result: &mut WideLimbs, right: &Limbs) {
        let digits = self.digits;
        result[..digits].copy_from_slice(&right[..digits]);
        let (shifted, mut carry) = self.lshift(right, 32);

        result[1 + digits] = carry + add_range(&mut result[1..1 + digits], &shifted[..digits]);
        result[2 + digits] = add_range(&mut result[2..2 + digits], &right[..digits]);
        carry += sub_range(&mut result[..digits], &shifted[..digits]);

        let diff = result[digits].wrapping_sub(carry);
        if diff > result[digits] {
            let mut i = 1 + digits;
            loop {
                result[i] = result[i].wrapping_sub(1);
                if result[i] != u64::MAX {
                    break;
                }
                i += 1;
            }
        }
        result[digits] = diff;
    }

    fn mmod_fast_384(&self, product: &WideLimbs) -> Limbs {
        let digits = self.digits;
        let mut work = *product;

        // Fold the high half down until it is exhausted.
        while work[digits..2 * digits].iter().any(|&limb| limb != 0) {
            let mut tmp = [0u64; 2 * MAX_DIGITS];
            let mut high = [0u64; MAX_DIGITS];
            high[..digits].copy_from_slice(&work[digits..2 * digits]);
            self.omega_mult_384(&mut tmp, &high);
            for limb in work[digits..2 * digits].iter_mut() {
                *limb = 0;
            }

            let mut carry = 0u64;
            for i in 0..digits + 3 {
                let (sum, over1) = work[i].overflowing_add(tmp[i]);
                let (sum, over2) = sum.overflowing_add(carry);
                work[i] = sum;
                carry = (over1 | over2) as u64;
            }
        }

        let mut low = [0u64; MAX_DIGITS];
        low.copy_from_slice(&work[..MAX_DIGITS]);
        let p = self.p;
        while self.cmp(&low, &p) != core::cmp::Ordering::Less {
            self.sub_assign(&mut low, &p);
        }
        low
    }

    fn mod_mult_fast(&self, left: &Limbs, right: &Limbs) -> Limbs {
        let product = self.mult(left, right);
        self.mmod_fast(&product)
    }

    fn mod_square_fast(&self, left: &Limbs) -> Limbs {
        let product = self.square(left);
        self.mmod_fast(&product)
    }

    /// Modular inverse by the even/odd binary GCD ("the great divide").
    fn mod_inv(&self, input: &Limbs, modulus: &Limbs) -> Limbs {
        if self.is_zero(input) {
            return [0; MAX_DIGITS];
        }

        let mut a = *input;
        let mut b = *modulus;
        let mut u = [0u64; MAX_DIGITS];
        u[0] = 1;
        let mut v = [0u64; MAX_DIGITS];

        loop {
            let ordering = self.cmp(&a, &b);
            if ordering == core::cmp::Ordering::Equal {
                break;
            }
            let mut carry = 0u64;
            if a[0] & 1 == 0 {
                self.rshift1(&mut a);
                if u[0] & 1 != 0 {
                    carry = self.add_assign(&mut u, modulus);
                }
                self.rshift1(&mut u);
                if carry != 0 {
                    u[self.digits - 1] |= 1 << 63;
                }
            } else if b[0] & 1 == 0 {
                self.rshift1(&mut b);
                if v[0] & 1 != 0 {
                    carry = self.add_assign(&mut v, modulus);
                }
                self.rshift1(&mut v);
                if carry != 0 {
                    v[self.digits - 1] |= 1 << 63;
                }
            } else if ordering == core::cmp::Ordering::Greater {
                self.sub_assign(&mut a, &b);
                self.rshift1(&mut a);
                if self.cmp(&u, &v) == core::cmp::Ordering::Less {
                    self.add_assign(&mut u, modulus);
                }
                self.sub_assign(&mut u, &v);
                if u[0] & 1 != 0 {
                    carry = self.add_assign(&mut u, modulus);
                }
                self.rshift1(&mut u);
                if carry != 0 {
                    u[self.digits - 1] |= 1 << 63;
                }
            } else {
                self.sub_assign(&mut b, &a);
                self.rshift1(&mut b);
                if self.cmp(&v, &u) == core::cmp::Ordering::Less {
                    self.add_assign(&mut v, modulus);
                }
                self.sub_assign(&mut v, &u);
                if v[0] & 1 != 0 {
                    carry = self.add_assign(&mut v, modulus);
                }
                self.rshift1(&mut v);
                if carry != 0 {
                    v[self.digits - 1] |= 1 << 63;
                }
            }
        }

        u
    }

    // ---- point arithmetic ----

    fn point_is_zero(&self, point: &Point) -> bool {
        self.is_zero(&point.x) && self.is_zero(&point.y)
    }

    /// Jacobian doubling in place; on return (x1, y1) hold the affine-ish
    /// co-Z representation and z1 the new Z.
    fn double_jacobian(&self, x1: &mut Limbs, y1: &mut Limbs, z1: &mut Limbs) {
        if self.is_zero(z1) {
            return;
        }
        let p = self.p;

        let mut t4 = self.mod_square_fast(y1); // y1^2
        let t5 = self.mod_mult_fast(x1, &t4); // A = x1*y1^2
        t4 = self.mod_square_fast(&t4); // y1^4
        *y1 = self.mod_mult_fast(y1, z1); // z3 = y1*z1
        *z1 = self.mod_square_fast(z1); // z1^2

        *x1 = self.mod_add(x1, z1, &p); // x1 + z1^2
        *z1 = self.mod_add(z1, z1, &p); // 2*z1^2
        *z1 = self.mod_sub(x1, z1, &p); // x1 - z1^2
        *x1 = self.mod_mult_fast(x1, z1); // x1^2 - z1^4

        *z1 = self.mod_add(x1, x1, &p); // 2*(x1^2 - z1^4)
        *x1 = self.mod_add(x1, z1, &p); // 3*(x1^2 - z1^4)
        if x1[0] & 1 != 0 {
            let carry = self.add_assign(x1, &p);
            self.rshift1(x1);
            x1[self.digits - 1] |= carry << 63;
        } else {
            self.rshift1(x1);
        }
        // x1 = B = 3/2*(x1^2 - z1^4)

        *z1 = self.mod_square_fast(x1); // B^2
        *z1 = self.mod_sub(z1, &t5, &p); // B^2 - A
        *z1 = self.mod_sub(z1, &t5, &p); // x3 = B^2 - 2A
        let t5 = self.mod_sub(&t5, z1, &p); // A - x3
        *x1 = self.mod_mult_fast(x1, &t5); // B*(A - x3)
        t4 = self.mod_sub(x1, &t4, &p); // y3 = B*(A - x3) - y1^4

        *x1 = *z1;
        *z1 = *y1;
        *y1 = t4;
    }

    /// (x1, y1) *= z^2, z^3.
    fn apply_z(&self, x1: &mut Limbs, y1: &mut Limbs, z: &Limbs) {
        let t1 = self.mod_square_fast(z);
        *x1 = self.mod_mult_fast(x1, &t1);
        let t1 = self.mod_mult_fast(&t1, z);
        *y1 = self.mod_mult_fast(y1, &t1);
    }

    /// P -> 2P in (x1, y1), P' (same Z) in (x2, y2).
    fn xycz_initial_double(
        &self,
        x1: &mut Limbs,
        y1: &mut Limbs,
        x2: &mut Limbs,
        y2: &mut Limbs,
        initial_z: Option<&Limbs>,
    ) {
        *x2 = *x1;
        *y2 = *y1;

        let mut z = [0u64; MAX_DIGITS];
        z[0] = 1;
        if let Some(seed_z) = initial_z {
            z = *seed_z;
        }
        self.apply_z(x1, y1, &z);
        self.double_jacobian(x1, y1, &mut z);
        self.apply_z(x2, y2, &z);
    }

    /// co-Z addition: P' -> (x1, y1), P + Q -> (x2, y2).
    fn xycz_add(&self, x1: &mut Limbs, y1: &mut Limbs, x2: &mut Limbs, y2: &mut Limbs) {
        let p = self.p;
        let mut t5 = self.mod_sub(x2, x1, &p); // x2 - x1
        t5 = self.mod_square_fast(&t5); // A = (x2 - x1)^2
        *x1 = self.mod_mult_fast(x1, &t5); // B = x1*A
        *x2 = self.mod_mult_fast(x2, &t5); // C = x2*A
        *y2 = self.mod_sub(y2, y1, &p); // y2 - y1
        t5 = self.mod_square_fast(y2); // D = (y2 - y1)^2

        t5 = self.mod_sub(&t5, x1, &p); // D - B
        t5 = self.mod_sub(&t5, x2, &p); // x3 = D - B - C
        *x2 = self.mod_sub(x2, x1, &p); // C - B
        *y1 = self.mod_mult_fast(y1, x2); // y1*(C - B)
        *x2 = self.mod_sub(x1, &t5, &p); // B - x3
        *y2 = self.mod_mult_fast(y2, x2); // (y2 - y1)*(B - x3)
        *y2 = self.mod_sub(y2, y1, &p); // y3
        *x2 = t5;
    }

    /// Conjugate co-Z addition: P + Q -> (x2, y2), P - Q -> (x1, y1).
    fn xycz_add_c(&self, x1: &mut Limbs, y1: &mut Limbs, x2: &mut Limbs, y2: &mut Limbs) {
        let p = self.p;
        let mut t5 = self.mod_sub(x2, x1, &p); // x2 - x1
        t5 = self.mod_square_fast(&t5); // A
        *x1 = self.mod_mult_fast(x1, &t5); // B
        *x2 = self.mod_mult_fast(x2, &t5); // C
        t5 = self.mod_add(y2, y1, &p); // y2 + y1
        *y2 = self.mod_sub(y2, y1, &p); // y2 - y1

        let mut t6 = self.mod_sub(x2, x1, &p); // C - B
        *y1 = self.mod_mult_fast(y1, &t6); // y1*(C - B)
        t6 = self.mod_add(x1, x2, &p); // B + C
        *x2 = self.mod_square_fast(y2); // (y2 - y1)^2
        *x2 = self.mod_sub(x2, &t6, &p); // x3

        let mut t7 = self.mod_sub(x1, x2, &p); // B - x3
        *y2 = self.mod_mult_fast(y2, &t7); // (y2 - y1)*(B - x3)
        *y2 = self.mod_sub(y2, y1, &p); // y3

        t7 = self.mod_square_fast(&t5); // F = (y2 + y1)^2
        t7 = self.mod_sub(&t7, &t6, &p); // x3'
        t6 = self.mod_sub(&t7, x1, &p); // x3' - B
        t6 = self.mod_mult_fast(&t6, &t5); // (y2 + y1)*(x3' - B)
        *y1 = self.mod_sub(&t6, y1, &p); // y3'

        *x1 = t7;
    }

    /// Montgomery ladder over the co-Z pair. The optional initial Z
    /// randomizes the projective representation.
    fn mult_point(&self, point: &Point, scalar: &Limbs, initial_z: Option<&Limbs>) -> Point {
        let mut rx = [[0u64; MAX_DIGITS]; 2];
        let mut ry = [[0u64; MAX_DIGITS]; 2];

        rx[1] = point.x;
        ry[1] = point.y;
        {
            let (x1, x0) = pair_mut(&mut rx, 1);
            let (y1, y0) = pair_mut(&mut ry, 1);
            self.xycz_initial_double(x1, y1, x0, y0, initial_z);
        }

        let mut i = self.num_bits(scalar) as i32 - 2;
        while i > 0 {
            let nb = usize::from(!Self::test_bit(scalar, i as u32));
            {
                let (xa, xb) = pair_mut(&mut rx, 1 - nb);
                let (ya, yb) = pair_mut(&mut ry, 1 - nb);
                self.xycz_add_c(xa, ya, xb, yb);
            }
            {
                let (xa, xb) = pair_mut(&mut rx, nb);
                let (ya, yb) = pair_mut(&mut ry, nb);
                self.xycz_add(xa, ya, xb, yb);
            }
            i -= 1;
        }

        let nb = usize::from(!Self::test_bit(scalar, 0));
        {
            let (xa, xb) = pair_mut(&mut rx, 1 - nb);
            let (ya, yb) = pair_mut(&mut ry, 1 - nb);
            self.xycz_add_c(xa, ya, xb, yb);
        }

        // Recover the final 1/Z from the ladder invariants.
        let p = self.p;
        let mut z = self.mod_sub(&rx[1], &rx[0], &p); // X1 - X0
        z = self.mod_mult_fast(&z, &ry[1 - nb]); // Yb * (X1 - X0)
        z = self.mod_mult_fast(&z, &point.x); // xP * Yb * (X1 - X0)
        z = self.mod_inv(&z, &p);
        z = self.mod_mult_fast(&z, &point.y); // yP / (xP * Yb * (X1 - X0))
        z = self.mod_mult_fast(&z, &rx[1 - nb]); // Xb * yP / (...)

        {
            let (xa, xb) = pair_mut(&mut rx, nb);
            let (ya, yb) = pair_mut(&mut ry, nb);
            self.xycz_add(xa, ya, xb, yb);
        }
        {
            let (x0, y0) = (&mut rx[0], &mut ry[0]);
            self.apply_z(x0, y0, &z);
        }

        Point { x: rx[0], y: ry[0] }
    }

    // ---- byte conversion (big-endian wire form) ----

    fn bytes_to_native(&self, bytes: &[u8]) -> Limbs {
        let mut native = [0u64; MAX_DIGITS];
        for i in 0..self.digits {
            let offset = 8 * (self.digits - 1 - i);
            let chunk = &bytes[offset..offset + 8];
            native[i] = u64::from_be_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ]);
        }
        native
    }

    fn native_to_bytes(&self, bytes: &mut [u8], native: &Limbs) {
        for i in 0..self.digits {
            let offset = 8 * (self.digits - 1 - i);
            bytes[offset..offset + 8].copy_from_slice(&native[i].to_be_bytes());
        }
    }
}

/// Disjoint mutable references to both ladder registers, `first` first.
fn pair_mut(arr: &mut [Limbs; 2], first: usize) -> (&mut Limbs, &mut Limbs) {
    let (lo, hi) = arr.split_at_mut(1);
    if first == 0 {
        (&mut lo[0], &mut hi[0])
    } else {
        (&mut hi[0], &mut lo[0])
    }
}

fn add_range(acc: &mut [u64], rhs: &[u64]) -> u64 {
    let mut carry = 0u64;
    for (slot, &addend) in acc.iter_mut().zip(rhs) {
        let (sum, over1) = slot.overflowing_add(addend);
        let (sum, over2) = sum.overflowing_add(carry);
        *slot = sum;
        carry = (over1 | over2) as u64;
    }
    carry
}

fn sub_range(acc: &mut [u64], rhs: &[u64]) -> u64 {
    let mut borrow = 0u64;
    for (slot, &subtrahend) in acc.iter_mut().zip(rhs) {
        let (diff, under1) = slot.overflowing_sub(subtrahend);
        let (diff, under2) = diff.overflowing_sub(borrow);
        *slot = diff;
        borrow = (under1 | under2) as u64;
    }
    borrow
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(bytes: usize, seed: u64) -> (Ecc, Vec<u8>) {
        let mut prng = Prng::new(seed);
        let ecc = Ecc::generate(bytes, &mut prng).unwrap();
        let mut public = vec![0u8; bytes * 2 + 1];
        let written = ecc.export_public_key(&mut public).unwrap();
        assert_eq!(written, bytes * 2 + 1);
        (ecc, public)
    }

    #[test]
    fn shared_secrets_agree_on_every_curve() {
        for bytes in [16usize, 24, 32, 48] {
            let (alice, alice_public) = keypair(bytes, 1);
            let (bob, bob_public) = keypair(bytes, 2);

            let mut rng_a = Prng::new(1001);
            let mut rng_b = Prng::new(2002);
            let mut secret_a = vec![0u8; bytes];
            let mut secret_b = vec![0u8; bytes];
            alice.compute_shared_secret(&bob_public, &mut secret_a, &mut rng_a).unwrap();
            bob.compute_shared_secret(&alice_public, &mut secret_b, &mut rng_b).unwrap();

            assert_eq!(secret_a, secret_b, "curve {} bytes", bytes);
            assert!(secret_a.iter().any(|&b| b != 0));
        }
    }

    #[test]
    fn independent_keypairs_differ() {
        let (_, public_a) = keypair(32, 10);
        let (_, public_b) = keypair(32, 20);
        assert_ne!(public_a, public_b);
    }

    #[test]
    fn rejects_unknown_curves_and_bad_peers() {
        let mut prng = Prng::new(3);
        assert!(Ecc::generate(20, &mut prng).is_err());

        let (alice, _) = keypair(32, 4);
        let mut secret = [0u8; 32];
        let mut rng = Prng::new(5);

        // Wrong length.
        assert!(alice.compute_shared_secret(&[0x04; 10], &mut secret, &mut rng).is_err());
        // Wrong point prefix.
        let mut bad = vec![0x02u8; 65];
        bad[1..].fill(1);
        assert!(alice.compute_shared_secret(&bad, &mut secret, &mut rng).is_err());
    }

    #[test]
    fn export_rejects_short_buffers() {
        let (alice, _) = keypair(16, 6);
        let mut short = [0u8; 32];
        assert!(alice.export_public_key(&mut short).is_err());
    }

    // Known P-256 doubling: 2G has well-known coordinates. A keypair with
    // d = 2 must export exactly that point, and the shared secret against
    // G itself must reproduce its X coordinate.
    #[test]
    fn p256_double_of_generator() {
        const X2G: &str = "7cf27b188d034f7e8a52380304b51ac3c08969e277f21b35a60b48fc47669978";
        const Y2G: &str = "07775510db8ed040293d9ac69f7430dbba7dade63ce982299e04b79d227873d1";

        let params = params_for(32).unwrap();
        let mut ecc = Ecc {
            bytes: 32,
            digits: 4,
            p: params.p,
            n: params.n,
            g: Point { x: params.gx, y: params.gy },
            private_key: [0; MAX_DIGITS],
            public_key: Point { x: [0; MAX_DIGITS], y: [0; MAX_DIGITS] },
        };
        ecc.private_key[0] = 2;
        let d = ecc.private_key;
        ecc.public_key = ecc.mult_point(&ecc.g.clone(), &d, None);

        let mut exported = [0u8; 65];
        ecc.export_public_key(&mut exported).unwrap();
        let hex: String = exported[1..33].iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, X2G);
        let hex: String = exported[33..].iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, Y2G);

        // d * G via the shared-secret path, with G as the peer point.
        let mut g_encoded = [0u8; 65];
        g_encoded[0] = 0x04;
        ecc.native_to_bytes(&mut g_encoded[1..33], &params.gx);
        ecc.native_to_bytes(&mut g_encoded[33..], &params.gy);
        let mut secret = [0u8; 32];
        let mut rng = Prng::new(7);
        ecc.compute_shared_secret(&g_encoded, &mut secret, &mut rng).unwrap();
        let hex: String = secret.iter().map(|b| format!("{:02x}", b)).collect();
        assert_eq!(hex, X2G);
    }
}
