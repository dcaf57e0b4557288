/// Computes a per-point descriptor `O` of `input`, looking up neighborhoods
/// with `search` according to `search_param`.
pub trait Feature<I: ?Sized, O, S: ?Sized, P> {
    fn compute(&self, input: &I, search: &S, search_param: P) -> O;
}
