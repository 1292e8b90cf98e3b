//! RSA key completion.
//!
//! Attacks rarely recover a whole key. [`complete`] takes whatever subset of
//! `{n, e, d, p, q, φ(n)}` is known and derives the rest, refusing to guess
//! when the material does not determine the key.

use num_bigint_dig::prime::probably_prime;
use num_bigint_dig::{BigUint, ModInverse};
use num_integer::Integer;
use num_traits::{One, Zero};

use crate::error::KeyError;

/// Public exponent assumed when none is known or derivable.
pub const DEFAULT_PUBLIC_EXPONENT: u32 = 65537;

/// Miller-Rabin rounds used when checking recovered factors.
const PRIMALITY_ROUNDS: usize = 20;

/// Witnesses tried when factoring `n` from a known exponent pair.
const FACTOR_BASES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// A sparse RSA parameter set. Absent fields are unknown, never zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialKey {
    pub n: Option<BigUint>,
    pub e: Option<BigUint>,
    pub d: Option<BigUint>,
    pub p: Option<BigUint>,
    pub q: Option<BigUint>,
    pub phi: Option<BigUint>,
}

impl PartialKey {
    /// A partial key carrying only the public pair.
    #[must_use]
    pub fn public(n: BigUint, e: BigUint) -> Self {
        Self {
            n: Some(n),
            e: Some(e),
            ..Self::default()
        }
    }
}

/// A verified RSA private key with its CRT parameters.
///
/// Invariants: `p` and `q` are distinct primes, `p * q == n`, and
/// `e * d ≡ 1 (mod lcm(p - 1, q - 1))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteKey {
    pub n: BigUint,
    pub e: BigUint,
    pub d: BigUint,
    pub p: BigUint,
    pub q: BigUint,
    /// `d mod (p - 1)`
    pub dp: BigUint,
    /// `d mod (q - 1)`
    pub dq: BigUint,
    /// `q⁻¹ mod p`
    pub qinv: BigUint,
}

impl CompleteKey {
    /// `φ(n) = (p - 1)(q - 1)`
    #[must_use]
    pub fn phi(&self) -> BigUint {
        (&self.p - 1u32) * (&self.q - 1u32)
    }

    /// `λ(n) = lcm(p - 1, q - 1)`
    #[must_use]
    pub fn lambda(&self) -> BigUint {
        (&self.p - 1u32).lcm(&(&self.q - 1u32))
    }
}

/// Derives the full key from `partial`.
///
/// Factors are recovered first (`n / p`, `(n, φ)` or `(n, e, d)`), then the
/// missing modulus, then whichever exponent is absent as the inverse of the
/// other modulo `λ(n)`. When neither exponent is known or derivable,
/// `preferred_e` is assumed.
///
/// # Errors
///
/// Returns `KeyError::InsufficientKeyMaterial` when the factors cannot be
/// determined (for example from `{n, e}` alone), `KeyError::NoModularInverse`
/// when the exponent is not invertible, and
/// `KeyError::InconsistentKeyMaterial` when supplied fields contradict each
/// other.
pub fn complete(partial: &PartialKey, preferred_e: &BigUint) -> Result<CompleteKey, KeyError> {
    let mut key = partial.clone();
    if [&key.n, &key.e, &key.d, &key.p, &key.q, &key.phi]
        .iter()
        .any(|v| v.as_ref().is_some_and(|v| v.is_zero()))
    {
        return Err(KeyError::InconsistentKeyMaterial(
            "parameters must be positive".into(),
        ));
    }

    fill_factors(&mut key)?;
    if key.e.is_none() && (key.d.is_none() || key.p.is_none()) {
        tracing::debug!(e = %preferred_e, "assuming public exponent");
        key.e = Some(preferred_e.clone());
        if fill_factors(&mut key).is_err() {
            return Err(KeyError::InsufficientKeyMaterial { missing: "e" });
        }
    }

    let (Some(p), Some(q)) = (key.p.take(), key.q.take()) else {
        let missing = if key.d.is_none() { "d" } else { "p and q" };
        return Err(KeyError::InsufficientKeyMaterial { missing });
    };
    check_factors(&p, &q)?;

    let n = &p * &q;
    if key.n.as_ref().is_some_and(|given| *given != n) {
        return Err(KeyError::InconsistentKeyMaterial("n does not equal p * q".into()));
    }
    let phi = (&p - 1u32) * (&q - 1u32);
    if key.phi.as_ref().is_some_and(|given| *given != phi) {
        return Err(KeyError::InconsistentKeyMaterial(
            "phi does not equal (p - 1)(q - 1)".into(),
        ));
    }
    let lambda = (&p - 1u32).lcm(&(&q - 1u32));

    let (e, d) = match (key.e, key.d) {
        (Some(e), Some(d)) => (e, d),
        (Some(e), None) => {
            let d = inverse(&e, &lambda).ok_or(KeyError::NoModularInverse {
                value: "e",
                modulus: "lcm(p - 1, q - 1)",
            })?;
            (e, d)
        }
        (None, Some(d)) => {
            let e = inverse(&d, &lambda).ok_or(KeyError::NoModularInverse {
                value: "d",
                modulus: "lcm(p - 1, q - 1)",
            })?;
            (e, d)
        }
        (None, None) => return Err(KeyError::InsufficientKeyMaterial { missing: "e" }),
    };

    if !((&e * &d) % &lambda).is_one() {
        return Err(KeyError::InconsistentKeyMaterial(
            "e * d is not 1 modulo lcm(p - 1, q - 1)".into(),
        ));
    }

    let dp = &d % (&p - 1u32);
    let dq = &d % (&q - 1u32);
    let qinv = inverse(&q, &p).ok_or(KeyError::NoModularInverse {
        value: "q",
        modulus: "p",
    })?;

    Ok(CompleteKey {
        n,
        e,
        d,
        p,
        q,
        dp,
        dq,
        qinv,
    })
}

/// `value⁻¹ mod modulus`, if it exists.
fn inverse(value: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    if modulus.is_zero() {
        return None;
    }
    value.mod_inverse(modulus)?.to_biguint()
}

fn check_factors(p: &BigUint, q: &BigUint) -> Result<(), KeyError> {
    if p == q {
        return Err(KeyError::InconsistentKeyMaterial("p and q are equal".into()));
    }
    for (name, factor) in [("p", p), ("q", q)] {
        if !probably_prime(factor, PRIMALITY_ROUNDS) {
            return Err(KeyError::InconsistentKeyMaterial(format!("{name} is not prime")));
        }
    }
    Ok(())
}

/// Fills in `p` and `q` from whatever else is known.
fn fill_factors(key: &mut PartialKey) -> Result<(), KeyError> {
    if key.p.is_none() && key.q.is_some() {
        std::mem::swap(&mut key.p, &mut key.q);
    }
    let Some(n) = key.n.clone() else {
        return Ok(());
    };

    if key.p.is_some() && key.q.is_some() {
        return Ok(());
    }
    if let Some(p) = key.p.clone() {
        let (q, rem) = n.div_rem(&p);
        if !rem.is_zero() || q.is_one() {
            return Err(KeyError::InconsistentKeyMaterial(
                "known factor does not divide n".into(),
            ));
        }
        key.q = Some(q);
        return Ok(());
    }

    let factors = if let Some(phi) = &key.phi {
        Some(factor_from_phi(&n, phi)?)
    } else if let (Some(e), Some(d)) = (&key.e, &key.d) {
        Some(factor_from_exponents(&n, e, d)?)
    } else {
        None
    };
    if let Some((p, q)) = factors {
        key.p = Some(p);
        key.q = Some(q);
    }
    Ok(())
}

/// Solves `x² - (n - φ + 1)x + n = 0` for the two factors of `n`.
fn factor_from_phi(n: &BigUint, phi: &BigUint) -> Result<(BigUint, BigUint), KeyError> {
    let inconsistent = || KeyError::InconsistentKeyMaterial("phi does not match n".into());
    if phi >= n {
        return Err(inconsistent());
    }
    let sum = n - phi + 1u32;
    let square = &sum * &sum;
    let four_n = n * 4u32;
    if square < four_n {
        return Err(inconsistent());
    }
    let disc = square - four_n;
    let root = disc.sqrt();
    if &root * &root != disc || sum.is_odd() != root.is_odd() {
        return Err(inconsistent());
    }
    let p = (&sum + &root) / 2u32;
    let q = (&sum - &root) / 2u32;
    if q <= BigUint::one() {
        return Err(inconsistent());
    }
    Ok((p, q))
}

/// Factors `n` from a matching exponent pair.
///
/// `e * d - 1` is a multiple of `λ(n)`; writing it as `2^t * r`, a square
/// root of one other than `±1` shows up for most bases and its neighbour
/// shares a factor with `n`.
fn factor_from_exponents(
    n: &BigUint,
    e: &BigUint,
    d: &BigUint,
) -> Result<(BigUint, BigUint), KeyError> {
    let one = BigUint::one();
    let n_minus_one = n - &one;
    let k = e * d - &one;
    if k.is_zero() || n <= &one {
        return Err(KeyError::InconsistentKeyMaterial("e * d must exceed 1".into()));
    }
    let mut r = k;
    let mut t = 0u32;
    while r.is_even() {
        r = r >> 1usize;
        t += 1;
    }

    for base in FACTOR_BASES {
        let g = BigUint::from(base);
        if &g >= n {
            break;
        }
        let shared = g.gcd(n);
        if !shared.is_one() {
            return Ok((n / &shared, shared));
        }
        let mut x = g.modpow(&r, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..t {
            let y = x.modpow(&BigUint::from(2u32), n);
            if y == one {
                let p = (&x - &one).gcd(n);
                return Ok((n / &p, p));
            }
            if y == n_minus_one {
                break;
            }
            x = y;
        }
    }
    Err(KeyError::InconsistentKeyMaterial(
        "n could not be factored from e and d".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn big(v: u64) -> BigUint {
        BigUint::from(v)
    }

    fn default_e() -> BigUint {
        big(u64::from(DEFAULT_PUBLIC_EXPONENT))
    }

    const PRIMES: [u64; 12] = [
        61, 53, 101, 113, 257, 1009, 7919, 10007, 65521, 104_729, 1_299_709, 2_147_483_647,
    ];

    #[test]
    fn completes_from_factors_and_exponent() {
        let partial = PartialKey {
            p: Some(big(61)),
            q: Some(big(53)),
            e: Some(big(17)),
            ..PartialKey::default()
        };
        let key = complete(&partial, &default_e()).unwrap();
        assert_eq!(key.n, big(3233));
        assert_eq!((&key.e * &key.d) % key.lambda(), BigUint::one());
        assert_eq!(key.dp, &key.d % big(60));
        assert_eq!(key.dq, &key.d % big(52));
        assert_eq!((&key.q * &key.qinv) % &key.p, BigUint::one());
    }

    #[test]
    fn public_pair_alone_is_insufficient() {
        let err = complete(&PartialKey::public(big(3233), big(17)), &default_e()).unwrap_err();
        assert_eq!(err, KeyError::InsufficientKeyMaterial { missing: "d" });
    }

    #[test]
    fn nothing_is_insufficient() {
        let err = complete(&PartialKey::default(), &default_e()).unwrap_err();
        assert!(matches!(err, KeyError::InsufficientKeyMaterial { .. }));
    }

    #[test]
    fn derives_e_from_d_when_e_is_unknown() {
        // n=35, d=5, p=7, q=5: lcm(6, 4) = 12 and 5 * 5 = 25 ≡ 1.
        let partial = PartialKey {
            n: Some(big(35)),
            d: Some(big(5)),
            p: Some(big(7)),
            q: Some(big(5)),
            ..PartialKey::default()
        };
        let key = complete(&partial, &default_e()).unwrap();
        assert_eq!(key.n, big(35));
        assert_eq!(key.p, big(7));
        assert_eq!(key.q, big(5));
        assert_eq!(key.e, big(5));
    }

    #[test]
    fn default_exponent_is_used_with_bare_factors() {
        let partial = PartialKey {
            p: Some(big(10007)),
            q: Some(big(65521)),
            ..PartialKey::default()
        };
        let key = complete(&partial, &default_e()).unwrap();
        assert_eq!(key.e, default_e());
    }

    #[test]
    fn recovers_cofactor_from_n() {
        let partial = PartialKey {
            n: Some(big(3233)),
            e: Some(big(17)),
            q: Some(big(53)),
            ..PartialKey::default()
        };
        let key = complete(&partial, &default_e()).unwrap();
        assert_eq!(key.p, big(53));
        assert_eq!(key.q, big(61));
    }

    #[test]
    fn factors_from_phi() {
        let partial = PartialKey {
            n: Some(big(3233)),
            phi: Some(big(3120)),
            e: Some(big(17)),
            ..PartialKey::default()
        };
        let key = complete(&partial, &default_e()).unwrap();
        let mut factors = [key.p.clone(), key.q.clone()];
        factors.sort();
        assert_eq!(factors, [big(53), big(61)]);
        assert_eq!(key.d, big(413) % key.lambda());
    }

    #[test]
    fn phi_alone_with_modulus_assumes_exponent() {
        let partial = PartialKey {
            n: Some(big(3233)),
            phi: Some(big(3120)),
            ..PartialKey::default()
        };
        let key = complete(&partial, &big(17)).unwrap();
        assert_eq!(key.e, big(17));
        assert_eq!(key.d, big(413));
    }

    #[test]
    fn phi_that_does_not_match_n_is_rejected() {
        let partial = PartialKey {
            n: Some(big(3233)),
            phi: Some(big(3000)),
            e: Some(big(17)),
            ..PartialKey::default()
        };
        assert!(matches!(
            complete(&partial, &default_e()),
            Err(KeyError::InconsistentKeyMaterial(_))
        ));
    }

    #[test]
    fn factors_from_exponent_pair() {
        let partial = PartialKey {
            n: Some(big(3233)),
            e: Some(big(17)),
            d: Some(big(2753)),
            ..PartialKey::default()
        };
        let key = complete(&partial, &default_e()).unwrap();
        assert_eq!(&key.p * &key.q, big(3233));
        assert_eq!(key.d, big(2753));
    }

    #[test]
    fn conflicting_modulus_is_rejected() {
        let partial = PartialKey {
            n: Some(big(3235)),
            e: Some(big(17)),
            p: Some(big(61)),
            q: Some(big(53)),
            ..PartialKey::default()
        };
        let err = complete(&partial, &default_e()).unwrap_err();
        assert!(matches!(err, KeyError::InconsistentKeyMaterial(_)));
    }

    #[test]
    fn non_dividing_factor_is_rejected() {
        let partial = PartialKey {
            n: Some(big(3233)),
            p: Some(big(59)),
            e: Some(big(17)),
            ..PartialKey::default()
        };
        let err = complete(&partial, &default_e()).unwrap_err();
        assert!(matches!(err, KeyError::InconsistentKeyMaterial(_)));
    }

    #[test]
    fn composite_factor_is_rejected() {
        let partial = PartialKey {
            p: Some(big(15)),
            q: Some(big(7)),
            e: Some(big(5)),
            ..PartialKey::default()
        };
        let err = complete(&partial, &default_e()).unwrap_err();
        assert!(matches!(err, KeyError::InconsistentKeyMaterial(_)));
    }

    #[test]
    fn equal_factors_are_rejected() {
        let partial = PartialKey {
            p: Some(big(61)),
            q: Some(big(61)),
            ..PartialKey::default()
        };
        let err = complete(&partial, &default_e()).unwrap_err();
        assert!(matches!(err, KeyError::InconsistentKeyMaterial(_)));
    }

    #[test]
    fn non_invertible_exponent() {
        // lcm(60, 52) = 780, gcd(3, 780) = 3.
        let partial = PartialKey {
            p: Some(big(61)),
            q: Some(big(53)),
            e: Some(big(3)),
            ..PartialKey::default()
        };
        let err = complete(&partial, &default_e()).unwrap_err();
        assert_eq!(
            err,
            KeyError::NoModularInverse {
                value: "e",
                modulus: "lcm(p - 1, q - 1)"
            }
        );
    }

    #[test]
    fn wrong_private_exponent_is_rejected() {
        let partial = PartialKey {
            p: Some(big(61)),
            q: Some(big(53)),
            e: Some(big(17)),
            d: Some(big(2754)),
            ..PartialKey::default()
        };
        let err = complete(&partial, &default_e()).unwrap_err();
        assert!(matches!(err, KeyError::InconsistentKeyMaterial(_)));
    }

    #[test]
    fn zero_fields_are_rejected() {
        let partial = PartialKey {
            n: Some(BigUint::zero()),
            ..PartialKey::default()
        };
        assert!(matches!(
            complete(&partial, &default_e()),
            Err(KeyError::InconsistentKeyMaterial(_))
        ));
    }

    proptest! {
        #[test]
        fn completion_is_consistent(
            i in 0..PRIMES.len(),
            j in 0..PRIMES.len(),
            e in prop::sample::select(vec![3u64, 5, 7, 17, 257, 65537]),
        ) {
            prop_assume!(i != j);
            let (p, q) = (big(PRIMES[i]), big(PRIMES[j]));
            let lambda = (&p - 1u32).lcm(&(&q - 1u32));
            prop_assume!(big(e).gcd(&lambda).is_one());

            let partial = PartialKey {
                p: Some(p.clone()),
                q: Some(q.clone()),
                e: Some(big(e)),
                ..PartialKey::default()
            };
            let key = complete(&partial, &default_e()).unwrap();
            prop_assert_eq!(&key.n, &(&p * &q));
            prop_assert_eq!((&key.e * &key.d) % &lambda, BigUint::one());

            // The exponent pair alone must lead back to the same factors.
            let again = complete(
                &PartialKey {
                    n: Some(key.n.clone()),
                    e: Some(key.e.clone()),
                    d: Some(key.d.clone()),
                    ..PartialKey::default()
                },
                &default_e(),
            )
            .unwrap();
            prop_assert_eq!(&again.p * &again.q, key.n);
        }
    }
}
