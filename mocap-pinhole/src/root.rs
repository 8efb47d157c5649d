/// Find function root
///
/// # Method
///
/// Newton-Bisection hybrid based on [^1]. Newton steps are taken while they stay inside the
/// bracket and shrink fast enough, otherwise the bracket is bisected. Converges to almost
/// machine precision.
///
/// `func` returns the function value together with its derivative.
///
/// Returns `None` when $f(a) ⋅ f(b) > 0$, i.e. the root is not bracketed.
///
/// # Resources
///
/// [^1]: Numerical Recipes 2nd edition. p. 365
///
/// <https://github.com/osveliz/numerical-veliz/blob/master/src/rootfinding/NewtSafe.adb>
pub(crate) fn root<F>(func: F, a: f64, b: f64) -> Option<f64>
where
    F: Fn(f64) -> (f64, f64),
{
    const MAX_ITERATIONS: usize = 200;

    let (mut xl, mut xh) = (a, b);
    let (fl, _) = func(xl);
    if fl == 0.0 {
        return Some(xl);
    }
    let (fh, _) = func(xh);
    if fh == 0.0 {
        return Some(xh);
    }
    if fl * fh > 0.0 || !(fl * fh).is_finite() {
        return None;
    }
    if fl > 0.0 {
        core::mem::swap(&mut xl, &mut xh);
    }
    let mut rts = 0.5 * (xl + xh);
    let mut dxold = (xl - xh).abs();
    let mut dx = dxold;
    let (mut f, mut df) = func(rts);
    for _ in 0..MAX_ITERATIONS {
        if (((rts - xh) * df - f) * ((rts - xl) * df - f) > 0.0)
            || (2.0 * f.abs() > (dxold * df).abs())
        {
            // Bisection step
            dxold = dx;
            dx = 0.5 * (xh - xl);
            rts = xl + dx;
            if xl == rts || xh == rts {
                return Some(rts);
            }
        } else {
            // Newton step
            dxold = dx;
            dx = f / df;
            let tmp = rts;
            rts -= dx;
            if tmp == rts {
                return Some(rts);
            }
        }
        let (nf, ndf) = func(rts);
        f = nf;
        df = ndf;
        if f < 0.0 {
            xl = rts;
        } else {
            xh = rts;
        }
    }
    Some(rts)
}

#[cfg(test)]
mod test {
    use super::root;

    #[test]
    fn cube_root() {
        let x = root(|x| (x * x * x - 2.0, 3.0 * x * x), 0.0, 2.0).unwrap();
        assert!((x - 2f64.cbrt()).abs() < 1e-14);
    }

    #[test]
    fn unbracketed() {
        assert!(root(|x| (x * x + 1.0, 2.0 * x), -1.0, 1.0).is_none());
    }
}
